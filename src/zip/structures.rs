use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ZipError, ZipResult};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// "Made by" for entries written here: MS-DOS host, spec version 2.0
pub const VERSION_MADE_BY: u16 = 20;
/// Minimum version needed to extract deflate entries
pub const VERSION_NEEDED: u16 = 20;

/// General purpose flag: sizes and CRC follow the data in a descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: file name and comment are UTF-8
pub const FLAG_UTF8: u16 = 0x0800;

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::MalformedArchive(
                "invalid end of central directory".into(),
            ));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Write the record (without the trailing comment bytes).
    pub fn write_to<W: Write>(&self, out: &mut W) -> ZipResult<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(self.comment_len)?;
        Ok(())
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Optional signature in front of a data descriptor
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Fixed part of a Local File Header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < LFH_SIZE || &data[0..4] != LFH_SIGNATURE {
            return Err(ZipError::MalformedArchive("invalid local file header".into()));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> ZipResult<()> {
        out.write_all(LFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression_method)?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size)?;
        out.write_u32::<LittleEndian>(self.uncompressed_size)?;
        out.write_u16::<LittleEndian>(self.file_name_length)?;
        out.write_u16::<LittleEndian>(self.extra_field_length)?;
        Ok(())
    }

    /// Offset of the entry data relative to the header start.
    pub fn data_offset(&self) -> u64 {
        LFH_SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub file_name: String,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub lfh_offset: u64,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    /// Central directory extra field (the local one for entries recovered by a sequential scan)
    pub extra_field: Vec<u8>,
    pub comment: Vec<u8>,
    pub is_directory: bool,
    /// Directory implied by a file path but absent from the archive index
    pub synthetic: bool,
}

impl ZipEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// A fresh entry as written by this crate, stamped with `now`.
    pub fn new(file_name: &str, method: CompressionMethod, now: SystemTime) -> Self {
        let (last_mod_time, last_mod_date) = dos_timestamp(now);
        let flags = if file_name.is_ascii() { 0 } else { FLAG_UTF8 };
        Self {
            file_name: file_name.to_string(),
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_NEEDED,
            flags,
            compression_method: method,
            last_mod_time,
            last_mod_date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            lfh_offset: 0,
            disk_number_start: 0,
            internal_attrs: 0,
            external_attrs: 0,
            extra_field: Vec::new(),
            comment: Vec::new(),
            is_directory: file_name.ends_with('/'),
            synthetic: false,
        }
    }

    /// A directory implied by the path of another entry.
    pub fn synthetic_directory(file_name: &str) -> Self {
        let mut entry = Self::new(file_name, CompressionMethod::Stored, UNIX_EPOCH);
        entry.is_directory = true;
        entry.synthetic = true;
        entry
    }

    /// Rebuild an entry from its local header, for archives without a usable central directory.
    pub fn from_local_header(
        file_name: String,
        lfh: &LocalFileHeader,
        lfh_offset: u64,
        extra_field: Vec<u8>,
    ) -> Self {
        let is_directory = file_name.ends_with('/');
        Self {
            file_name,
            version_made_by: lfh.version_needed,
            version_needed: lfh.version_needed,
            flags: lfh.flags,
            compression_method: CompressionMethod::from_u16(lfh.compression_method),
            last_mod_time: lfh.last_mod_time,
            last_mod_date: lfh.last_mod_date,
            crc32: lfh.crc32,
            compressed_size: lfh.compressed_size as u64,
            uncompressed_size: lfh.uncompressed_size as u64,
            lfh_offset,
            disk_number_start: 0,
            internal_attrs: 0,
            external_attrs: 0,
            extra_field,
            comment: Vec::new(),
            is_directory,
            synthetic: false,
        }
    }

    pub fn uses_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Local header describing this entry, with no local extra field.
    pub fn local_header(&self) -> ZipResult<LocalFileHeader> {
        Ok(LocalFileHeader {
            version_needed: self.version_needed,
            flags: self.flags & !FLAG_DATA_DESCRIPTOR,
            compression_method: self.compression_method.as_u16(),
            last_mod_time: self.last_mod_time,
            last_mod_date: self.last_mod_date,
            crc32: self.crc32,
            compressed_size: to_u32(self.compressed_size, "entry compressed size")?,
            uncompressed_size: to_u32(self.uncompressed_size, "entry size")?,
            file_name_length: to_u16(self.file_name.len(), "file name length")?,
            extra_field_length: 0,
        })
    }

    /// Write this entry's central directory record.
    pub fn write_central_header<W: Write>(&self, out: &mut W) -> ZipResult<()> {
        let name = self.file_name.as_bytes();

        out.write_all(CDFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(to_u32(self.compressed_size, "entry compressed size")?)?;
        out.write_u32::<LittleEndian>(to_u32(self.uncompressed_size, "entry size")?)?;
        out.write_u16::<LittleEndian>(to_u16(name.len(), "file name length")?)?;
        out.write_u16::<LittleEndian>(to_u16(self.extra_field.len(), "extra field length")?)?;
        out.write_u16::<LittleEndian>(to_u16(self.comment.len(), "file comment length")?)?;
        out.write_u16::<LittleEndian>(self.disk_number_start)?;
        out.write_u16::<LittleEndian>(self.internal_attrs)?;
        out.write_u32::<LittleEndian>(self.external_attrs)?;
        out.write_u32::<LittleEndian>(to_u32(self.lfh_offset, "local header offset")?)?;
        out.write_all(name)?;
        out.write_all(&self.extra_field)?;
        out.write_all(&self.comment)?;
        Ok(())
    }
}

pub(crate) fn to_u16(value: usize, what: &'static str) -> ZipResult<u16> {
    u16::try_from(value).map_err(|_| ZipError::LimitExceeded(what))
}

pub(crate) fn to_u32(value: u64, what: &'static str) -> ZipResult<u32> {
    u32::try_from(value).map_err(|_| ZipError::LimitExceeded(what))
}

/// Encode a point in time as a DOS (time, date) pair in UTC.
///
/// DOS dates start in 1980; anything earlier is clamped to 1980-01-01 00:00:00.
pub fn dos_timestamp(at: SystemTime) -> (u16, u16) {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    if year < 1980 {
        return (0, (1 << 5) | 1);
    }

    let hour = (rem / 3600) as u16;
    let minute = ((rem % 3600) / 60) as u16;
    let second = (rem % 60) as u16;

    let time = (hour << 11) | (minute << 5) | (second / 2);
    let date = (((year - 1980).min(127) as u16) << 9) | ((month as u16) << 5) | day as u16;
    (time, date)
}

// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}
