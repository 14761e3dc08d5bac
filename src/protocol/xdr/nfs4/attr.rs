//! Typed view of the `fattr4` attribute list.
//!
//! An `fattr4` is a bitmap followed by an opaque blob holding the value of
//! every set bit, packed in ascending bit order. Each attribute has its own
//! XDR type, so the blob can only be walked by a decoder that knows every
//! attribute it may meet; a set bit this decoder does not know is an error.

use std::io::Cursor;

use super::{bitmap4, fattr4, nfs_ftype4, nfstime4};
use crate::xdr::{deserialize, invalid_data, Serialize};

pub const FATTR4_TYPE: u32 = 1;
pub const FATTR4_CHANGE: u32 = 3;
pub const FATTR4_SIZE: u32 = 4;
pub const FATTR4_LEASE_TIME: u32 = 10;
pub const FATTR4_FILEID: u32 = 20;
pub const FATTR4_MAXREAD: u32 = 30;
pub const FATTR4_MAXWRITE: u32 = 31;
pub const FATTR4_MODE: u32 = 33;
pub const FATTR4_NUMLINKS: u32 = 35;
pub const FATTR4_OWNER: u32 = 36;
pub const FATTR4_OWNER_GROUP: u32 = 37;
pub const FATTR4_TIME_ACCESS: u32 = 47;
pub const FATTR4_TIME_METADATA: u32 = 52;
pub const FATTR4_TIME_MODIFY: u32 = 53;

/// Attributes requested for every stat-like call.
pub const STAT_ATTRS: &[u32] = &[
    FATTR4_TYPE,
    FATTR4_CHANGE,
    FATTR4_SIZE,
    FATTR4_FILEID,
    FATTR4_MODE,
    FATTR4_NUMLINKS,
    FATTR4_OWNER,
    FATTR4_OWNER_GROUP,
    FATTR4_TIME_ACCESS,
    FATTR4_TIME_METADATA,
    FATTR4_TIME_MODIFY,
];

/// Filesystem-wide limits read once at connect.
pub const FS_ATTRS: &[u32] = &[FATTR4_LEASE_TIME, FATTR4_MAXREAD, FATTR4_MAXWRITE];

/// Builds a bitmap with exactly the given bits set.
pub fn bitmap(bits: &[u32]) -> bitmap4 {
    let mut words: bitmap4 = Vec::new();
    for &bit in bits {
        let word = (bit / 32) as usize;
        if words.len() <= word {
            words.resize(word + 1, 0);
        }
        words[word] |= 1 << (bit % 32);
    }
    words
}

/// Set bits of `mask` in ascending order.
pub fn bits(mask: &[u32]) -> impl Iterator<Item = u32> + '_ {
    mask.iter().enumerate().flat_map(|(word, &value)| {
        (0..32u32).filter(move |bit| value & (1 << bit) != 0).map(move |bit| word as u32 * 32 + bit)
    })
}

/// Every attribute this client understands. `None` means the server did not
/// return it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fattr {
    pub file_type: Option<nfs_ftype4>,
    pub change: Option<u64>,
    pub size: Option<u64>,
    pub lease_time: Option<u32>,
    pub fileid: Option<u64>,
    pub maxread: Option<u64>,
    pub maxwrite: Option<u64>,
    pub mode: Option<u32>,
    pub numlinks: Option<u32>,
    pub owner: Option<String>,
    pub owner_group: Option<String>,
    pub time_access: Option<nfstime4>,
    pub time_metadata: Option<nfstime4>,
    pub time_modify: Option<nfstime4>,
}

impl Fattr {
    pub fn decode(attrs: &fattr4) -> std::io::Result<Fattr> {
        let mut out = Fattr::default();
        let mut src = Cursor::new(attrs.attr_vals.as_slice());
        for bit in bits(&attrs.attrmask) {
            match bit {
                FATTR4_TYPE => out.file_type = Some(deserialize(&mut src)?),
                FATTR4_CHANGE => out.change = Some(deserialize(&mut src)?),
                FATTR4_SIZE => out.size = Some(deserialize(&mut src)?),
                FATTR4_LEASE_TIME => out.lease_time = Some(deserialize(&mut src)?),
                FATTR4_FILEID => out.fileid = Some(deserialize(&mut src)?),
                FATTR4_MAXREAD => out.maxread = Some(deserialize(&mut src)?),
                FATTR4_MAXWRITE => out.maxwrite = Some(deserialize(&mut src)?),
                FATTR4_MODE => out.mode = Some(deserialize(&mut src)?),
                FATTR4_NUMLINKS => out.numlinks = Some(deserialize(&mut src)?),
                FATTR4_OWNER => out.owner = Some(deserialize(&mut src)?),
                FATTR4_OWNER_GROUP => out.owner_group = Some(deserialize(&mut src)?),
                FATTR4_TIME_ACCESS => out.time_access = Some(deserialize(&mut src)?),
                FATTR4_TIME_METADATA => out.time_metadata = Some(deserialize(&mut src)?),
                FATTR4_TIME_MODIFY => out.time_modify = Some(deserialize(&mut src)?),
                other => return Err(invalid_data(&format!("unsupported attribute bit {other}"))),
            }
        }
        if src.position() as usize != attrs.attr_vals.len() {
            return Err(invalid_data("trailing bytes after attribute values"));
        }
        Ok(out)
    }

    /// Packs the present attributes into an `fattr4`.
    pub fn encode(&self) -> std::io::Result<fattr4> {
        let mut set = Vec::new();
        let mut vals = Vec::new();
        macro_rules! put {
            ($field:ident, $bit:expr) => {
                if let Some(value) = &self.$field {
                    set.push($bit);
                    value.serialize(&mut vals)?;
                }
            };
        }
        put!(file_type, FATTR4_TYPE);
        put!(change, FATTR4_CHANGE);
        put!(size, FATTR4_SIZE);
        put!(lease_time, FATTR4_LEASE_TIME);
        put!(fileid, FATTR4_FILEID);
        put!(maxread, FATTR4_MAXREAD);
        put!(maxwrite, FATTR4_MAXWRITE);
        put!(mode, FATTR4_MODE);
        put!(numlinks, FATTR4_NUMLINKS);
        put!(owner, FATTR4_OWNER);
        put!(owner_group, FATTR4_OWNER_GROUP);
        put!(time_access, FATTR4_TIME_ACCESS);
        put!(time_metadata, FATTR4_TIME_METADATA);
        put!(time_modify, FATTR4_TIME_MODIFY);
        Ok(fattr4 { attrmask: bitmap(&set), attr_vals: vals })
    }
}
