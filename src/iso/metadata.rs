//! iTunes-style metadata extraction.
//!
//! Tags live under `moov/udta/meta/ilst`, one box per tag, each holding
//! a `data` box whose type indicator says how the value is encoded. Only
//! text tags and the binary track/disc number pairs are extracted; cover
//! art is deliberately left to the application layer.

use std::collections::BTreeMap;

use crate::io::ByteSource;
use crate::iso::boxes::{BoxHeader, BoxType};
use crate::iso::parser::BoxParser;

/// Largest tag value read into memory.
const MAX_TAG_VALUE_SIZE: u64 = 64 * 1024;

impl<S: ByteSource> BoxParser<S> {
    /// Walk a `udta` payload and collect tags into `metadata`.
    pub fn parse_user_data_box(
        &mut self,
        offset: u64,
        size: u64,
        depth: u32,
        metadata: &mut BTreeMap<String, String>,
    ) -> bool {
        self.parse_box_recursively(offset, size, depth, &mut |p, header, _rel, d| {
            if header.box_type == BoxType::META {
                // meta is a full box: children start after version/flags.
                let payload = header.payload_size();
                if payload > 4 {
                    p.parse_item_list_container(header.data_offset + 4, payload - 4, d, metadata);
                }
            }
            true
        })
    }

    fn parse_item_list_container(
        &mut self,
        offset: u64,
        size: u64,
        depth: u32,
        metadata: &mut BTreeMap<String, String>,
    ) -> bool {
        self.parse_box_recursively(offset, size, depth, &mut |p, header, _rel, d| {
            if header.box_type == BoxType::ILST {
                p.parse_item_list(header.data_offset, header.payload_size(), d, metadata);
            }
            true
        })
    }

    fn parse_item_list(
        &mut self,
        offset: u64,
        size: u64,
        depth: u32,
        metadata: &mut BTreeMap<String, String>,
    ) -> bool {
        self.parse_box_recursively(offset, size, depth, &mut |p, item, _rel, d| {
            let Some(key) = tag_name(item.box_type) else {
                return true;
            };
            p.parse_box_recursively(
                item.data_offset,
                item.payload_size(),
                d,
                &mut |p, data_box, _rel, _d| {
                    if data_box.box_type != BoxType::DATA {
                        return true;
                    }
                    if let Some(value) = p.read_tag_value(data_box, item.box_type) {
                        metadata.insert(key.to_string(), value);
                    }
                    true
                },
            );
            true
        })
    }

    /// Decode one `data` box value.
    fn read_tag_value(&mut self, header: &BoxHeader, tag: BoxType) -> Option<String> {
        let payload = self.read_payload(header, MAX_TAG_VALUE_SIZE)?;
        // type indicator (4, with flags in the low 24 bits) + locale (4)
        if payload.len() < 8 {
            return None;
        }
        let type_indicator = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
            & 0x00FF_FFFF;
        let value = &payload[8..];

        match (tag, type_indicator) {
            // Track and disc numbers are big-endian pairs at bytes 2..6.
            (BoxType::TRACK_NUMBER | BoxType::DISC_NUMBER, _) => {
                if value.len() < 6 {
                    return None;
                }
                let number = u16::from_be_bytes([value[2], value[3]]);
                let total = u16::from_be_bytes([value[4], value[5]]);
                Some(if total > 0 {
                    format!("{number}/{total}")
                } else {
                    number.to_string()
                })
            }
            // Type 1 is UTF-8 text.
            (_, 1) => String::from_utf8(value.to_vec()).ok(),
            _ => None,
        }
    }
}

fn tag_name(box_type: BoxType) -> Option<&'static str> {
    match box_type {
        BoxType::NAME_TITLE => Some("title"),
        BoxType::NAME_ARTIST => Some("artist"),
        BoxType::NAME_ALBUM => Some("album"),
        BoxType::NAME_DATE => Some("date"),
        BoxType::NAME_GENRE => Some("genre"),
        BoxType::NAME_COMMENT => Some("comment"),
        BoxType::NAME_TOOL => Some("encoder"),
        BoxType::ALBUM_ARTIST => Some("album_artist"),
        BoxType::TRACK_NUMBER => Some("track"),
        BoxType::DISC_NUMBER => Some("disc"),
        _ => None,
    }
}
