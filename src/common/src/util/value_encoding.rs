// Copyright 2025 Strata Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Row value codec: the serialized form of a feature's datums.
//!
//! Layout is one cell per attribute in schema order: a presence byte, then a
//! type-directed payload. Fixed-width types carry no length; variable-width
//! types carry a big-endian u32 length. The layout is skippable without
//! decoding, which is what the projection and lazy paths rely on.

use std::cell::OnceCell;

use bytes::BufMut;

use crate::catalog::FeatureType;
use crate::error::{StrataError, StrataResult};
use crate::types::{DataType, Datum, Geometry, ScalarImpl};

/// Serialize datums aligned with the feature type's attributes.
pub fn serialize(ft: &FeatureType, datums: &[Datum]) -> StrataResult<Vec<u8>> {
    if datums.len() != ft.attributes().len() {
        return Err(StrataError::serde(format!(
            "feature has {} datums but type `{}` has {} attributes",
            datums.len(),
            ft.name(),
            ft.attributes().len()
        )));
    }
    let mut buf = Vec::with_capacity(64);
    for (attr, datum) in ft.attributes().iter().zip(datums.iter()) {
        serialize_datum(&attr.data_type, datum, &mut buf)?;
    }
    Ok(buf)
}

/// Deserialize every attribute.
///
/// A value may end early at a cell boundary: attributes appended to the
/// schema after the row was written read as null.
pub fn deserialize(ft: &FeatureType, bytes: &[u8]) -> StrataResult<Vec<Datum>> {
    let mut reader = Reader::new(bytes);
    let mut datums = Vec::with_capacity(ft.attributes().len());
    for attr in ft.attributes() {
        if reader.is_exhausted() {
            datums.push(None);
            continue;
        }
        datums.push(deserialize_datum(&attr.data_type, &mut reader)?);
    }
    Ok(datums)
}

/// Deserialize only the attributes at `projection`, in projection order,
/// skipping everything else without decoding it.
pub fn deserialize_projection(
    ft: &FeatureType,
    projection: &[usize],
    bytes: &[u8],
) -> StrataResult<Vec<Datum>> {
    let lazy = LazyRow::new(ft, bytes);
    projection.iter().map(|&idx| lazy.datum(idx)).collect()
}

/// Serialize one datum on its own, used by per-attribute columns.
pub fn serialize_single(dt: &DataType, datum: &Datum) -> StrataResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(16);
    serialize_datum(dt, datum, &mut buf)?;
    Ok(buf)
}

/// Inverse of [`serialize_single`].
pub fn deserialize_single(dt: &DataType, bytes: &[u8]) -> StrataResult<Datum> {
    let mut reader = Reader::new(bytes);
    deserialize_datum(dt, &mut reader)
}

/// A view over serialized datums that decodes attributes on demand.
///
/// Cell offsets are discovered by a single skip-walk on first access; values
/// are only decoded when asked for. Cheap to construct per row.
pub struct LazyRow<'a> {
    ft: &'a FeatureType,
    bytes: &'a [u8],
    offsets: OnceCell<StrataResult<Vec<usize>>>,
}

impl<'a> LazyRow<'a> {
    pub fn new(ft: &'a FeatureType, bytes: &'a [u8]) -> Self {
        Self {
            ft,
            bytes,
            offsets: OnceCell::new(),
        }
    }

    fn offsets(&self) -> StrataResult<&[usize]> {
        let computed = self.offsets.get_or_init(|| {
            let mut reader = Reader::new(self.bytes);
            let mut offsets = Vec::with_capacity(self.ft.attributes().len());
            for attr in self.ft.attributes() {
                offsets.push(reader.pos);
                if !reader.is_exhausted() {
                    skip_datum(&attr.data_type, &mut reader)?;
                }
            }
            Ok(offsets)
        });
        match computed {
            Ok(offsets) => Ok(offsets),
            Err(e) => Err(StrataError::serde(e.to_string())),
        }
    }

    pub fn datum(&self, index: usize) -> StrataResult<Datum> {
        let offsets = self.offsets()?;
        let offset = *offsets
            .get(index)
            .ok_or_else(|| StrataError::serde("attribute index out of range"))?;
        if offset >= self.bytes.len() {
            // attribute appended after this row was written
            return Ok(None);
        }
        let mut reader = Reader::new(&self.bytes[offset..]);
        deserialize_datum(&self.ft.attribute(index).data_type, &mut reader)
    }
}

fn serialize_datum(dt: &DataType, datum: &Datum, buf: &mut Vec<u8>) -> StrataResult<()> {
    match datum {
        None => buf.put_u8(0),
        Some(value) => {
            buf.put_u8(1);
            serialize_value(dt, value, buf)?;
        }
    }
    Ok(())
}

fn serialize_value(dt: &DataType, value: &ScalarImpl, buf: &mut Vec<u8>) -> StrataResult<()> {
    match (dt, value) {
        (DataType::Boolean, ScalarImpl::Bool(v)) => buf.put_u8(*v as u8),
        (DataType::Int32, ScalarImpl::Int32(v)) => buf.put_i32(*v),
        (DataType::Int64, ScalarImpl::Int64(v)) => buf.put_i64(*v),
        (DataType::Float32, ScalarImpl::Float32(v)) => buf.put_f32(*v),
        (DataType::Float64, ScalarImpl::Float64(v)) => buf.put_f64(*v),
        (DataType::Timestamp, ScalarImpl::Timestamp(v)) => buf.put_i64(*v),
        (DataType::Uuid, ScalarImpl::Uuid(v)) => buf.put_slice(v.as_bytes()),
        (DataType::Varchar, ScalarImpl::Varchar(s)) => {
            buf.put_u32(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        (DataType::List(element), ScalarImpl::List(items)) => {
            buf.put_u32(items.len() as u32);
            for item in items {
                serialize_datum(element, &Some(item.clone()), buf)?;
            }
        }
        (DataType::Map(key, value_type), ScalarImpl::Map(pairs)) => {
            buf.put_u32(pairs.len() as u32);
            for (k, v) in pairs {
                serialize_datum(key, &Some(k.clone()), buf)?;
                serialize_datum(value_type, &Some(v.clone()), buf)?;
            }
        }
        (dt, ScalarImpl::Geometry(g)) if dt.is_geometry() => {
            let payload = bincode::serialize(g.inner())
                .map_err(|e| StrataError::serde(e.to_string()))?;
            buf.put_u32(payload.len() as u32);
            buf.put_slice(&payload);
        }
        (dt, value) => {
            return Err(StrataError::serde(format!(
                "value {value:?} does not match attribute type {dt:?}"
            )));
        }
    }
    Ok(())
}

fn deserialize_datum(dt: &DataType, reader: &mut Reader<'_>) -> StrataResult<Datum> {
    match reader.u8()? {
        0 => Ok(None),
        1 => Ok(Some(deserialize_value(dt, reader)?)),
        flag => Err(StrataError::serde(format!("bad presence byte {flag}"))),
    }
}

fn deserialize_value(dt: &DataType, reader: &mut Reader<'_>) -> StrataResult<ScalarImpl> {
    let value = match dt {
        DataType::Boolean => ScalarImpl::Bool(reader.u8()? != 0),
        DataType::Int32 => ScalarImpl::Int32(i32::from_be_bytes(reader.array()?)),
        DataType::Int64 => ScalarImpl::Int64(i64::from_be_bytes(reader.array()?)),
        DataType::Float32 => ScalarImpl::Float32(f32::from_be_bytes(reader.array()?)),
        DataType::Float64 => ScalarImpl::Float64(f64::from_be_bytes(reader.array()?)),
        DataType::Timestamp => ScalarImpl::Timestamp(i64::from_be_bytes(reader.array()?)),
        DataType::Uuid => ScalarImpl::Uuid(uuid::Uuid::from_bytes(reader.array()?)),
        DataType::Varchar => {
            let len = reader.u32()? as usize;
            let bytes = reader.slice(len)?;
            ScalarImpl::Varchar(
                std::str::from_utf8(bytes)
                    .map_err(|e| StrataError::serde(e.to_string()))?
                    .to_owned(),
            )
        }
        DataType::List(element) => {
            let len = reader.u32()? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                match deserialize_datum(element, reader)? {
                    Some(item) => items.push(item),
                    None => return Err(StrataError::serde("null element inside a list")),
                }
            }
            ScalarImpl::List(items)
        }
        DataType::Map(key, value_type) => {
            let len = reader.u32()? as usize;
            let mut pairs = Vec::with_capacity(len);
            for _ in 0..len {
                let k = deserialize_datum(key, reader)?
                    .ok_or_else(|| StrataError::serde("null key inside a map"))?;
                let v = deserialize_datum(value_type, reader)?
                    .ok_or_else(|| StrataError::serde("null value inside a map"))?;
                pairs.push((k, v));
            }
            ScalarImpl::Map(pairs)
        }
        dt if dt.is_geometry() => {
            let len = reader.u32()? as usize;
            let payload = reader.slice(len)?;
            let inner: geo_types::Geometry<f64> =
                bincode::deserialize(payload).map_err(|e| StrataError::serde(e.to_string()))?;
            ScalarImpl::Geometry(Geometry::new(inner))
        }
        dt => return Err(StrataError::serde(format!("unhandled attribute type {dt:?}"))),
    };
    Ok(value)
}

fn skip_datum(dt: &DataType, reader: &mut Reader<'_>) -> StrataResult<()> {
    if reader.u8()? == 0 {
        return Ok(());
    }
    skip_value(dt, reader)
}

fn skip_value(dt: &DataType, reader: &mut Reader<'_>) -> StrataResult<()> {
    match dt {
        DataType::Boolean => reader.skip(1),
        DataType::Int32 | DataType::Float32 => reader.skip(4),
        DataType::Int64 | DataType::Float64 | DataType::Timestamp => reader.skip(8),
        DataType::Uuid => reader.skip(16),
        DataType::Varchar => {
            let len = reader.u32()? as usize;
            reader.skip(len)
        }
        DataType::List(element) => {
            let len = reader.u32()? as usize;
            for _ in 0..len {
                skip_datum(element, reader)?;
            }
            Ok(())
        }
        DataType::Map(key, value_type) => {
            let len = reader.u32()? as usize;
            for _ in 0..len {
                skip_datum(key, reader)?;
                skip_datum(value_type, reader)?;
            }
            Ok(())
        }
        _ => {
            let len = reader.u32()? as usize;
            reader.skip(len)
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn u8(&mut self) -> StrataResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| StrataError::serde("truncated value"))?;
        self.pos += 1;
        Ok(b)
    }

    fn u32(&mut self) -> StrataResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn slice(&mut self, len: usize) -> StrataResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| StrataError::serde("truncated value"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn skip(&mut self, len: usize) -> StrataResult<()> {
        self.slice(len).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> StrataResult<[u8; N]> {
        Ok(self.slice(N)?.try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::{AttributeDescriptor, FeatureType};

    fn test_type() -> FeatureType {
        FeatureType::builder("t")
            .attribute(AttributeDescriptor::new("name", DataType::Varchar))
            .attribute(AttributeDescriptor::new("age", DataType::Int32))
            .attribute(AttributeDescriptor::new("dtg", DataType::Timestamp))
            .attribute(AttributeDescriptor::new(
                "tags",
                DataType::List(Box::new(DataType::Varchar)),
            ))
            .attribute(AttributeDescriptor::new("geom", DataType::Point))
            .build()
            .unwrap()
    }

    fn test_datums() -> Vec<Datum> {
        vec![
            Some(ScalarImpl::Varchar("alice".into())),
            Some(ScalarImpl::Int32(42)),
            None,
            Some(ScalarImpl::List(vec![
                ScalarImpl::Varchar("a".into()),
                ScalarImpl::Varchar("b".into()),
            ])),
            Some(ScalarImpl::Geometry(Geometry::point(40.0, 60.0))),
        ]
    }

    #[test]
    fn test_roundtrip() {
        let ft = test_type();
        let datums = test_datums();
        let bytes = serialize(&ft, &datums).unwrap();
        assert_eq!(deserialize(&ft, &bytes).unwrap(), datums);
    }

    #[test]
    fn test_projection_skips() {
        let ft = test_type();
        let datums = test_datums();
        let bytes = serialize(&ft, &datums).unwrap();
        let projected = deserialize_projection(&ft, &[4, 1], &bytes).unwrap();
        assert_eq!(projected, vec![datums[4].clone(), datums[1].clone()]);
    }

    #[test]
    fn test_lazy_row() {
        let ft = test_type();
        let datums = test_datums();
        let bytes = serialize(&ft, &datums).unwrap();
        let lazy = LazyRow::new(&ft, &bytes);
        assert_eq!(lazy.datum(2).unwrap(), None);
        assert_eq!(lazy.datum(0).unwrap(), datums[0]);
        assert_eq!(lazy.datum(4).unwrap(), datums[4]);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let ft = test_type();
        let mut datums = test_datums();
        datums[1] = Some(ScalarImpl::Varchar("not a number".into()));
        assert!(serialize(&ft, &datums).is_err());
    }

    #[test]
    fn test_truncated_value_rejected() {
        let ft = test_type();
        let bytes = serialize(&ft, &test_datums()).unwrap();
        assert!(deserialize(&ft, &bytes[..bytes.len() - 3]).is_err());
    }
}
