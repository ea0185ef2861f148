//! Compact binary encoding of routing tables for cluster state propagation.
//!
//! Layout of a table in the thin variant (index identity known from
//! context):
//!
//! ```text
//! shard number (varint) | copy count (varint) | copy ...
//! ```
//!
//! and of each copy:
//!
//! ```text
//! current node (opt str) | relocating node (opt str) | primary (u8)
//!   | state (u8) | allocation ID presence (u8)
//!   [ | id (str) | relocation id (opt str) ]
//! ```
//!
//! where a string is its byte length (varint) followed by UTF-8 bytes, and an
//! optional string is a presence byte optionally followed by a string. The
//! full variant prefixes the index name and UUID strings.

use std::str;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::encoding::{decode_varint, encode_varint};

use crate::routing::{
    AllocationId, CopyState, IndexId, RoutingTable, RoutingTableBuilder,
    ShardCopy, ShardId,
};
use crate::utils::ShardRouteError;

/// Smallest encoded copy: two absent strings, primary, state, absent
/// allocation ID.
const MIN_COPY_LEN: usize = 5;

fn put_str(buf: &mut impl BufMut, s: &str) {
    encode_varint(s.len() as u64, buf);
    buf.put_slice(s.as_bytes());
}

fn put_opt_str(buf: &mut impl BufMut, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.put_u8(1);
            put_str(buf, s);
        }
        None => buf.put_u8(0),
    }
}

fn get_u8(buf: &mut impl Buf, what: &str) -> Result<u8, ShardRouteError> {
    if !buf.has_remaining() {
        return Err(ShardRouteError::decode(format!(
            "stream ended before {}",
            what
        )));
    }
    Ok(buf.get_u8())
}

fn get_flag(buf: &mut impl Buf, what: &str) -> Result<bool, ShardRouteError> {
    match get_u8(buf, what)? {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(ShardRouteError::decode(format!(
            "invalid {} byte {}",
            what, b
        ))),
    }
}

fn get_str(buf: &mut impl Buf) -> Result<String, ShardRouteError> {
    let len = decode_varint(buf)?;
    if len > buf.remaining() as u64 {
        return Err(ShardRouteError::decode(format!(
            "string of {} bytes with {} bytes left",
            len,
            buf.remaining()
        )));
    }
    let bytes = buf.copy_to_bytes(len as usize);
    Ok(str::from_utf8(&bytes)?.to_string())
}

fn get_opt_str(buf: &mut impl Buf) -> Result<Option<String>, ShardRouteError> {
    if get_flag(buf, "string presence")? {
        Ok(Some(get_str(buf)?))
    } else {
        Ok(None)
    }
}

/// Appends one copy; its shard identity is implied by the table.
fn encode_copy(copy: &ShardCopy, buf: &mut impl BufMut) {
    put_opt_str(buf, copy.current_node());
    put_opt_str(buf, copy.relocating_node());
    buf.put_u8(copy.primary() as u8);
    buf.put_u8(copy.state().code());
    match copy.allocation_id() {
        Some(aid) => {
            buf.put_u8(1);
            put_str(buf, &aid.id);
            put_opt_str(buf, aid.relocation_id.as_deref());
        }
        None => buf.put_u8(0),
    }
}

fn decode_copy(
    buf: &mut impl Buf,
    shard_id: &ShardId,
) -> Result<ShardCopy, ShardRouteError> {
    let current_node = get_opt_str(buf)?;
    let relocating_node = get_opt_str(buf)?;
    let primary = get_flag(buf, "primary")?;
    let code = get_u8(buf, "state")?;
    let state = CopyState::from_code(code).ok_or_else(|| {
        ShardRouteError::decode(format!("invalid state byte {}", code))
    })?;
    let allocation_id = if get_flag(buf, "allocation ID presence")? {
        Some(AllocationId {
            id: get_str(buf)?,
            relocation_id: get_opt_str(buf)?,
        })
    } else {
        None
    };

    ShardCopy::new(
        shard_id.clone(),
        primary,
        state,
        current_node,
        relocating_node,
        allocation_id,
    )
    .map_err(ShardRouteError::decode)
}

/// Encodes a table without its index identity.
pub fn encode_thin(table: &RoutingTable, buf: &mut impl BufMut) {
    encode_varint(table.shard_id().shard as u64, buf);
    encode_varint(table.size() as u64, buf);
    for copy in table {
        encode_copy(copy, buf);
    }
}

/// Decodes a table encoded by [`encode_thin`], belonging to given index.
/// The placement invariants are checked again; bytes after the table are
/// left in the buffer.
pub fn decode_thin(
    buf: &mut impl Buf,
    index: &IndexId,
) -> Result<RoutingTable, ShardRouteError> {
    let shard = decode_varint(buf)?;
    let shard = u32::try_from(shard).map_err(|_| {
        ShardRouteError::decode(format!("shard number {} out of range", shard))
    })?;
    let shard_id = ShardId::new(index.clone(), shard);

    let count = decode_varint(buf)?;
    if count > (buf.remaining() / MIN_COPY_LEN) as u64 {
        return Err(ShardRouteError::decode(format!(
            "{} copies of {} with {} bytes left",
            count,
            shard_id,
            buf.remaining()
        )));
    }

    let mut builder = RoutingTableBuilder::new(shard_id.clone());
    for _ in 0..count {
        builder.add(decode_copy(buf, &shard_id)?);
    }
    builder.build()
}

/// Encodes a table including its index identity.
pub fn encode(table: &RoutingTable, buf: &mut impl BufMut) {
    let index = &table.shard_id().index;
    put_str(buf, &index.name);
    put_str(buf, &index.uuid);
    encode_thin(table, buf);
}

/// Decodes a table encoded by [`encode`].
pub fn decode(buf: &mut impl Buf) -> Result<RoutingTable, ShardRouteError> {
    let name = get_str(buf)?;
    let uuid = get_str(buf)?;
    decode_thin(buf, &IndexId::new(name, uuid))
}

/// Encodes a table including its index identity into a fresh buffer.
pub fn to_bytes(table: &RoutingTable) -> Bytes {
    let mut buf = BytesMut::new();
    encode(table, &mut buf);
    buf.freeze()
}

#[cfg(test)]
mod wire_tests {
    use super::*;

    fn index() -> IndexId {
        IndexId::new("logs", "u1")
    }

    fn shard() -> ShardId {
        ShardId::new(index(), 5)
    }

    fn mixed_table() -> Result<RoutingTable, ShardRouteError> {
        RoutingTableBuilder::new(shard())
            .add(ShardCopy::new_started(shard(), true, "n1", "a1"))
            .add(ShardCopy::new_relocating(
                shard(),
                false,
                "n2",
                "n3",
                "a2",
                "a3",
            )?)
            .add(ShardCopy::new_initializing(shard(), false, "n4", "a4"))
            .add(ShardCopy::new_unassigned(shard(), false))
            .build()
    }

    #[test]
    fn roundtrip_full() -> Result<(), ShardRouteError> {
        let table = mixed_table()?;
        let mut bytes = to_bytes(&table);
        let decoded = decode(&mut bytes)?;
        assert_eq!(decoded, table);
        assert_eq!(decoded.shard_id(), table.shard_id());
        assert_eq!(decoded.all_initializing().len(), 2);
        assert!(!bytes.has_remaining());
        Ok(())
    }

    #[test]
    fn roundtrip_thin_edge_tables() -> Result<(), ShardRouteError> {
        let primary_only = RoutingTableBuilder::new(shard())
            .add(ShardCopy::new_started(shard(), true, "n1", "a1"))
            .build()?;
        let all_unassigned = RoutingTableBuilder::new(shard())
            .add(ShardCopy::new_unassigned(shard(), false))
            .add(ShardCopy::new_unassigned(shard(), false))
            .build()?;
        let empty = RoutingTableBuilder::new(shard()).build()?;

        for table in [primary_only, all_unassigned, empty] {
            let mut buf = BytesMut::new();
            encode_thin(&table, &mut buf);
            let decoded = decode_thin(&mut buf.freeze(), &index())?;
            assert_eq!(decoded, table);
        }
        Ok(())
    }

    #[test]
    fn trailing_bytes_kept() -> Result<(), ShardRouteError> {
        let table = mixed_table()?;
        let mut buf = BytesMut::new();
        encode_thin(&table, &mut buf);
        buf.put_u8(0xab);
        let mut bytes = buf.freeze();
        assert_eq!(decode_thin(&mut bytes, &index())?, table);
        assert_eq!(&bytes[..], &[0xab]);
        Ok(())
    }

    #[test]
    fn short_read() -> Result<(), ShardRouteError> {
        let bytes = to_bytes(&mixed_table()?);
        for cut in [0, 3, bytes.len() / 2, bytes.len() - 1] {
            let mut truncated = bytes.slice(..cut);
            assert!(matches!(
                decode(&mut truncated),
                Err(ShardRouteError::Decode(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn bad_bytes() {
        // shard 0, one copy, no nodes, replica, state 9
        let mut buf = Bytes::from_static(&[0, 1, 0, 0, 0, 9, 0]);
        assert!(matches!(
            decode_thin(&mut buf, &index()),
            Err(ShardRouteError::Decode(m)) if m.contains("state")
        ));

        // started copy without a node
        let mut buf = Bytes::from_static(&[0, 1, 0, 0, 0, 2, 0]);
        assert!(decode_thin(&mut buf, &index()).is_err());

        // shard number beyond u32
        let mut buf = BytesMut::new();
        encode_varint(u32::MAX as u64 + 1, &mut buf);
        encode_varint(0, &mut buf);
        assert!(decode_thin(&mut buf.freeze(), &index()).is_err());

        // invalid utf-8 node name
        let mut buf =
            Bytes::from_static(&[0, 1, 1, 2, 0xff, 0xfe, 0, 0, 1, 0]);
        assert!(matches!(
            decode_thin(&mut buf, &index()),
            Err(ShardRouteError::Decode(_))
        ));
    }

    #[test]
    fn placement_conflict_on_decode() {
        let mut buf = BytesMut::new();
        encode_varint(5, &mut buf);
        encode_varint(2, &mut buf);
        for aid in ["a1", "a2"] {
            put_opt_str(&mut buf, Some("n1"));
            put_opt_str(&mut buf, None);
            buf.put_u8(0);
            buf.put_u8(CopyState::Started.code());
            buf.put_u8(1);
            put_str(&mut buf, aid);
            put_opt_str(&mut buf, None);
        }
        assert_eq!(
            decode_thin(&mut buf.freeze(), &index()),
            Err(ShardRouteError::PlacementConflict {
                shard: shard(),
                node: "n1".into()
            })
        );
    }
}
