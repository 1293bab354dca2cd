use log::warn;

use crate::constants::{
    X0001_ZIP64, X000A_NTFS, X5455_EXTENDEDTIMESTAMP, X5855_OLDUNIX, X7855_IUNIX,
};
use crate::descriptor::{ArchiveDescriptor, ArchiveDescriptorReader};
use crate::error::{ArchiveError, Result};

/// Which 32-bit header slots were saturated with `0xFFFFFFFF` (or
/// `0xFFFF` for the disk number), and therefore which 64-bit values the
/// ZIP64 extra field payload carries, in this fixed order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Context {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub local_header_offset: bool,
    pub disk_number_start: bool,
}

impl Zip64Context {
    pub fn any(&self) -> bool {
        self.uncompressed_size
            || self.compressed_size
            || self.local_header_offset
            || self.disk_number_start
    }
}

/// Payload of the ZIP64 extended information field (0x0001). A value is
/// present only when the corresponding header slot was saturated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_number_start: Option<u32>,
}

impl Zip64Extra {
    fn parse(payload: &[u8], context: Zip64Context) -> Result<Zip64Extra> {
        let mut indexer = ArchiveDescriptorReader::new();
        let mut field = Zip64Extra::default();

        if context.uncompressed_size {
            field.uncompressed_size = Some(indexer.read_u64(payload)?);
        }
        if context.compressed_size {
            field.compressed_size = Some(indexer.read_u64(payload)?);
        }
        if context.local_header_offset {
            field.local_header_offset = Some(indexer.read_u64(payload)?);
        }
        if context.disk_number_start {
            field.disk_number_start = Some(indexer.read_u32(payload)?);
        }

        if indexer.get_index() < payload.len() {
            // Some writers pad the record with fields that were not
            // actually saturated; the header slots already hold those
            // values, so the slack is ignorable.
            warn!(
                "ignoring {} slack bytes in a zip64 extra field",
                payload.len() - indexer.get_index()
            );
        }

        Ok(field)
    }

    fn write(&self, desc: &mut ArchiveDescriptor) {
        let mut size = 0u16;
        if self.uncompressed_size.is_some() {
            size += 8;
        }
        if self.compressed_size.is_some() {
            size += 8;
        }
        if self.local_header_offset.is_some() {
            size += 8;
        }
        if self.disk_number_start.is_some() {
            size += 4;
        }

        desc.write_u16(X0001_ZIP64);
        desc.write_u16(size);
        if let Some(val) = self.uncompressed_size {
            desc.write_u64(val);
        }
        if let Some(val) = self.compressed_size {
            desc.write_u64(val);
        }
        if let Some(val) = self.local_header_offset {
            desc.write_u64(val);
        }
        if let Some(val) = self.disk_number_start {
            desc.write_u32(val);
        }
    }
}

/// The Info-ZIP extended timestamp field (0x5455): Unix seconds selected
/// by a flag byte. The central form repeats the flags but carries the
/// modification time only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    flags: u8,
    modify_time: Option<i32>,
    access_time: Option<i32>,
    create_time: Option<i32>,
}

impl ExtendedTimestamp {
    const MODIFY_TIME_BIT: u8 = 1;
    const ACCESS_TIME_BIT: u8 = 2;
    const CREATE_TIME_BIT: u8 = 4;

    pub fn new(
        modify_time: Option<i32>,
        access_time: Option<i32>,
        create_time: Option<i32>,
    ) -> Self {
        let mut field = Self::default();
        field.set_modify_time(modify_time);
        field.set_access_time(access_time);
        field.set_create_time(create_time);
        field
    }

    pub fn modify_time(&self) -> Option<i32> {
        self.modify_time
    }

    pub fn access_time(&self) -> Option<i32> {
        self.access_time
    }

    pub fn create_time(&self) -> Option<i32> {
        self.create_time
    }

    pub fn set_modify_time(&mut self, modify_time: Option<i32>) {
        self.modify_time = modify_time;
        if modify_time.is_some() {
            self.flags |= Self::MODIFY_TIME_BIT;
        } else {
            self.flags &= !Self::MODIFY_TIME_BIT;
        }
    }

    pub fn set_access_time(&mut self, access_time: Option<i32>) {
        self.access_time = access_time;
        if access_time.is_some() {
            self.flags |= Self::ACCESS_TIME_BIT;
        } else {
            self.flags &= !Self::ACCESS_TIME_BIT;
        }
    }

    pub fn set_create_time(&mut self, create_time: Option<i32>) {
        self.create_time = create_time;
        if create_time.is_some() {
            self.flags |= Self::CREATE_TIME_BIT;
        } else {
            self.flags &= !Self::CREATE_TIME_BIT;
        }
    }

    fn parse(payload: &[u8]) -> Result<ExtendedTimestamp> {
        let mut indexer = ArchiveDescriptorReader::new();
        let mut field = ExtendedTimestamp::default();

        if payload.is_empty() {
            return Ok(field);
        }

        field.flags = indexer.read_u8(payload)?;

        // The central form truncates after the modification time, so the
        // times actually present are bounded by the payload, not the
        // flag bits.
        let mut remaining = (payload.len() - 1) / 4;
        if field.flags & Self::MODIFY_TIME_BIT != 0 && remaining > 0 {
            field.modify_time = Some(indexer.read_i32(payload)?);
            remaining -= 1;
        }
        if field.flags & Self::ACCESS_TIME_BIT != 0 && remaining > 0 {
            field.access_time = Some(indexer.read_i32(payload)?);
            remaining -= 1;
        }
        if field.flags & Self::CREATE_TIME_BIT != 0 && remaining > 0 {
            field.create_time = Some(indexer.read_i32(payload)?);
        }

        Ok(field)
    }

    fn local_data_size(&self) -> u16 {
        1 + (self.flags.count_ones() * 4) as u16
    }

    fn central_data_size(&self) -> u16 {
        1 + ((self.flags & Self::MODIFY_TIME_BIT).count_ones() * 4) as u16
    }

    fn write(&self, desc: &mut ArchiveDescriptor, local: bool) {
        if self.flags == 0 {
            return;
        }

        desc.write_u16(X5455_EXTENDEDTIMESTAMP);
        desc.write_u16(if local {
            self.local_data_size()
        } else {
            self.central_data_size()
        });
        desc.write_u8(self.flags);

        if let Some(modify_time) = self.modify_time {
            desc.write_i32(modify_time);
        }

        if local {
            if let Some(access_time) = self.access_time {
                desc.write_i32(access_time);
            }
            if let Some(create_time) = self.create_time {
                desc.write_i32(create_time);
            }
        }
    }
}

/// Info-ZIP Unix uid/gid field (0x7855). Some writers strip the ids
/// from the central form, leaving an empty marker; both shapes parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnixUidGid {
    pub uid: u16,
    pub gid: u16,
}

impl UnixUidGid {
    fn parse(payload: &[u8]) -> Result<UnixUidGid> {
        if payload.is_empty() {
            return Ok(UnixUidGid::default());
        }

        let mut indexer = ArchiveDescriptorReader::new();
        Ok(UnixUidGid {
            uid: indexer.read_u16(payload)?,
            gid: indexer.read_u16(payload)?,
        })
    }

    fn write(&self, desc: &mut ArchiveDescriptor) {
        desc.write_u16(X7855_IUNIX);
        desc.write_u16(4);
        desc.write_u16(self.uid);
        desc.write_u16(self.gid);
    }
}

/// The legacy Info-ZIP Unix field (0x5855): access and modification
/// times, with uid/gid trailing in the local form only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OldUnix {
    pub access_time: Option<i32>,
    pub modify_time: Option<i32>,
    pub uid: Option<u16>,
    pub gid: Option<u16>,
}

impl OldUnix {
    fn parse(payload: &[u8]) -> Result<OldUnix> {
        let mut indexer = ArchiveDescriptorReader::new();
        let mut field = OldUnix::default();

        if payload.len() >= 8 {
            field.access_time = Some(indexer.read_i32(payload)?);
            field.modify_time = Some(indexer.read_i32(payload)?);
        }
        if payload.len() >= 12 {
            field.uid = Some(indexer.read_u16(payload)?);
            field.gid = Some(indexer.read_u16(payload)?);
        }

        Ok(field)
    }

    fn write(&self, desc: &mut ArchiveDescriptor, local: bool) {
        let has_ids = local && self.uid.is_some() && self.gid.is_some();

        desc.write_u16(X5855_OLDUNIX);
        desc.write_u16(if has_ids { 12 } else { 8 });
        desc.write_i32(self.access_time.unwrap_or(0));
        desc.write_i32(self.modify_time.unwrap_or(0));
        if has_ids {
            desc.write_u16(self.uid.unwrap_or(0));
            desc.write_u16(self.gid.unwrap_or(0));
        }
    }
}

/// NTFS times field (0x000A): 100ns Windows FILETIME values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NtfsTimes {
    pub modify_time: u64,
    pub access_time: u64,
    pub create_time: u64,
}

impl NtfsTimes {
    const TIMES_TAG: u16 = 0x0001;

    fn parse(payload: &[u8]) -> Result<NtfsTimes> {
        let mut indexer = ArchiveDescriptorReader::new();
        let mut field = NtfsTimes::default();

        let _reserved = indexer.read_u32(payload)?;
        while indexer.get_index() + 4 <= payload.len() {
            let tag = indexer.read_u16(payload)?;
            let size = indexer.read_u16(payload)? as usize;

            if tag == Self::TIMES_TAG && size >= 24 {
                field.modify_time = indexer.read_u64(payload)?;
                field.access_time = indexer.read_u64(payload)?;
                field.create_time = indexer.read_u64(payload)?;
                indexer.read_bytes(payload, size - 24)?;
            } else {
                indexer.read_bytes(payload, size)?;
            }
        }

        Ok(field)
    }

    fn write(&self, desc: &mut ArchiveDescriptor) {
        desc.write_u16(X000A_NTFS);
        desc.write_u16(4 + 4 + 24);
        desc.write_u32(0); // reserved
        desc.write_u16(Self::TIMES_TAG);
        desc.write_u16(24);
        desc.write_u64(self.modify_time);
        desc.write_u64(self.access_time);
        desc.write_u64(self.create_time);
    }
}

/// One extra field record: a recognised payload or opaque bytes kept for
/// verbatim round-tripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Zip64(Zip64Extra),
    ExtendedTimestamp(ExtendedTimestamp),
    UnixUidGid(UnixUidGid),
    OldUnix(OldUnix),
    Ntfs(NtfsTimes),
    Unknown { header_id: u16, data: Vec<u8> },
}

impl ExtraField {
    pub fn header_id(&self) -> u16 {
        match self {
            ExtraField::Zip64(_) => X0001_ZIP64,
            ExtraField::ExtendedTimestamp(_) => X5455_EXTENDEDTIMESTAMP,
            ExtraField::UnixUidGid(_) => X7855_IUNIX,
            ExtraField::OldUnix(_) => X5855_OLDUNIX,
            ExtraField::Ntfs(_) => X000A_NTFS,
            ExtraField::Unknown { header_id, .. } => *header_id,
        }
    }
}

/// The ordered collection of extra field records attached to an entry.
///
/// Order is preserved from parse to emit. The ZIP64 record is special:
/// the entry codec owns its emission (its content depends on which
/// header slots saturate), so `encode_*` skip it here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    fields: Vec<ExtraField>,
}

impl ExtraFields {
    pub fn new() -> ExtraFields {
        ExtraFields::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtraField> {
        self.fields.iter()
    }

    pub fn get(&self, header_id: u16) -> Option<&ExtraField> {
        self.fields.iter().find(|f| f.header_id() == header_id)
    }

    /// Replaces the record with the same id in place, or appends.
    pub fn set(&mut self, field: ExtraField) {
        let id = field.header_id();
        match self.fields.iter_mut().find(|f| f.header_id() == id) {
            Some(slot) => *slot = field,
            None => self.fields.push(field),
        }
    }

    pub fn delete(&mut self, header_id: u16) -> Option<ExtraField> {
        let pos = self.fields.iter().position(|f| f.header_id() == header_id)?;
        Some(self.fields.remove(pos))
    }

    pub fn zip64(&self) -> Option<&Zip64Extra> {
        match self.get(X0001_ZIP64) {
            Some(ExtraField::Zip64(z)) => Some(z),
            _ => None,
        }
    }

    pub fn extended_timestamp(&self) -> Option<&ExtendedTimestamp> {
        match self.get(X5455_EXTENDEDTIMESTAMP) {
            Some(ExtraField::ExtendedTimestamp(ts)) => Some(ts),
            _ => None,
        }
    }

    pub fn unix_uid_gid(&self) -> Option<&UnixUidGid> {
        match self.get(X7855_IUNIX) {
            Some(ExtraField::UnixUidGid(ids)) => Some(ids),
            _ => None,
        }
    }

    /// Decodes the concatenated `(id, length, payload)` records of one
    /// header. `zip64_context` names the saturated 32-bit slots so the
    /// ZIP64 payload can be interpreted.
    pub fn parse(data: &[u8], zip64_context: Zip64Context) -> Result<ExtraFields> {
        let mut indexer = ArchiveDescriptorReader::new();
        let mut fields = Vec::new();

        while indexer.get_index() + 4 <= data.len() {
            let header_id = indexer.read_u16(data)?;
            let size = indexer.read_u16(data)? as usize;
            let payload = indexer.read_bytes(data, size)?;

            let field = match header_id {
                X0001_ZIP64 => ExtraField::Zip64(Zip64Extra::parse(&payload, zip64_context)?),
                X5455_EXTENDEDTIMESTAMP => {
                    ExtraField::ExtendedTimestamp(ExtendedTimestamp::parse(&payload)?)
                }
                X7855_IUNIX => ExtraField::UnixUidGid(UnixUidGid::parse(&payload)?),
                X5855_OLDUNIX => ExtraField::OldUnix(OldUnix::parse(&payload)?),
                X000A_NTFS => ExtraField::Ntfs(NtfsTimes::parse(&payload)?),
                _ => ExtraField::Unknown {
                    header_id,
                    data: payload,
                },
            };
            fields.push(field);
        }

        if indexer.get_index() != data.len() {
            return Err(ArchiveError::MalformedArchive(format!(
                "{} trailing bytes after the last extra field record",
                data.len() - indexer.get_index()
            )));
        }

        Ok(ExtraFields { fields })
    }

    pub fn encode_local(&self) -> Vec<u8> {
        self.encode(true)
    }

    pub fn encode_central(&self) -> Vec<u8> {
        self.encode(false)
    }

    fn encode(&self, local: bool) -> Vec<u8> {
        let mut desc = ArchiveDescriptor::new(64);

        for field in &self.fields {
            match field {
                // Emitted by the entry codec alongside the header slots.
                ExtraField::Zip64(_) => {}
                ExtraField::ExtendedTimestamp(ts) => ts.write(&mut desc, local),
                ExtraField::UnixUidGid(ids) => ids.write(&mut desc),
                ExtraField::OldUnix(old) => old.write(&mut desc, local),
                ExtraField::Ntfs(ntfs) => ntfs.write(&mut desc),
                ExtraField::Unknown { header_id, data } => {
                    desc.write_u16(*header_id);
                    desc.write_u16(data.len() as u16);
                    desc.write_bytes(data);
                }
            }
        }

        desc.finish()
    }
}

pub(crate) fn encode_zip64_record(desc: &mut ArchiveDescriptor, field: &Zip64Extra) {
    field.write(desc);
}
