use crate::codec::{MAX_PAGE_SIZE, MIN_PAGE_SIZE, SALT_SIZE};
use crate::DatabaseError;
use sha2::{Digest, Sha256};
use std::mem::size_of;

// Database layout:
//
// Page 0 holds the header and is never encrypted. Pages 1.. hold the payload stream, each
// encoded by the codec when the database is encrypted.
//
// Header (first 128 bytes of page 0):
// 9 bytes: magic number
// 1 byte: file format version
// 1 byte: flags
// 1 byte: padding
// 4 bytes: page size
// 16 bytes: KDF salt
// 8 bytes: page count, including the header page
// 8 bytes: payload length
// 8 bytes: row count
// 8 bytes: padding
// 64 bytes: header check, computed over the previous 64 bytes

pub(crate) const MAGICNUMBER: [u8; 9] = [b'r', b'k', b'd', b'b', 0x1A, 0x0A, 0xA9, 0x0D, 0x0A];
const VERSION_OFFSET: usize = MAGICNUMBER.len();
const FLAGS_OFFSET: usize = VERSION_OFFSET + size_of::<u8>();
const PAGE_SIZE_OFFSET: usize = FLAGS_OFFSET + size_of::<u8>() + 1; // +1 for padding
const SALT_OFFSET: usize = PAGE_SIZE_OFFSET + size_of::<u32>();
const PAGE_COUNT_OFFSET: usize = SALT_OFFSET + SALT_SIZE;
const PAYLOAD_LENGTH_OFFSET: usize = PAGE_COUNT_OFFSET + size_of::<u64>();
const ROW_COUNT_OFFSET: usize = PAYLOAD_LENGTH_OFFSET + size_of::<u64>();
pub(crate) const CHECK_OFFSET: usize = 64;
pub(crate) const CHECK_SIZE: usize = 64;
pub(crate) const DB_HEADER_SIZE: usize = CHECK_OFFSET + CHECK_SIZE;

const FILE_FORMAT_VERSION: u8 = 1;

// Flags
const ENCRYPTED: u8 = 1;

fn get_u32(data: &[u8]) -> u32 {
    let mut bytes = [0u8; size_of::<u32>()];
    bytes.copy_from_slice(&data[..size_of::<u32>()]);
    u32::from_le_bytes(bytes)
}

fn get_u64(data: &[u8]) -> u64 {
    let mut bytes = [0u8; size_of::<u64>()];
    bytes.copy_from_slice(&data[..size_of::<u64>()]);
    u64::from_le_bytes(bytes)
}

fn not_a_database(msg: &str) -> DatabaseError {
    DatabaseError::NotADatabase(msg.to_string())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DatabaseHeader {
    pub(crate) encrypted: bool,
    pub(crate) page_size: u32,
    pub(crate) salt: [u8; SALT_SIZE],
    pub(crate) page_count: u64,
    pub(crate) payload_length: u64,
    pub(crate) row_count: u64,
}

impl DatabaseHeader {
    pub(crate) fn new(page_size: u32, salt: Option<[u8; SALT_SIZE]>) -> Self {
        Self {
            encrypted: salt.is_some(),
            page_size,
            salt: salt.unwrap_or([0; SALT_SIZE]),
            page_count: 1,
            payload_length: 0,
            row_count: 0,
        }
    }

    /// The authenticated part of the header, without the check
    pub(crate) fn to_bytes(&self) -> [u8; CHECK_OFFSET] {
        let mut result = [0; CHECK_OFFSET];
        result[..MAGICNUMBER.len()].copy_from_slice(&MAGICNUMBER);
        result[VERSION_OFFSET] = FILE_FORMAT_VERSION;
        if self.encrypted {
            result[FLAGS_OFFSET] |= ENCRYPTED;
        }
        result[PAGE_SIZE_OFFSET..(PAGE_SIZE_OFFSET + size_of::<u32>())]
            .copy_from_slice(&self.page_size.to_le_bytes());
        result[SALT_OFFSET..(SALT_OFFSET + SALT_SIZE)].copy_from_slice(&self.salt);
        result[PAGE_COUNT_OFFSET..(PAGE_COUNT_OFFSET + size_of::<u64>())]
            .copy_from_slice(&self.page_count.to_le_bytes());
        result[PAYLOAD_LENGTH_OFFSET..(PAYLOAD_LENGTH_OFFSET + size_of::<u64>())]
            .copy_from_slice(&self.payload_length.to_le_bytes());
        result[ROW_COUNT_OFFSET..(ROW_COUNT_OFFSET + size_of::<u64>())]
            .copy_from_slice(&self.row_count.to_le_bytes());

        result
    }

    /// Structural decode. The header check is verified by the caller, since it needs the codec
    pub(crate) fn from_bytes(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() < DB_HEADER_SIZE {
            return Err(not_a_database("file is too short"));
        }
        if data[..MAGICNUMBER.len()] != MAGICNUMBER {
            return Err(not_a_database("invalid magic number"));
        }
        if data[VERSION_OFFSET] != FILE_FORMAT_VERSION {
            return Err(DatabaseError::NotADatabase(format!(
                "unknown file format version {}",
                data[VERSION_OFFSET]
            )));
        }
        let page_size = get_u32(&data[PAGE_SIZE_OFFSET..]);
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(DatabaseError::NotADatabase(format!(
                "invalid page size {page_size}"
            )));
        }
        let page_count = get_u64(&data[PAGE_COUNT_OFFSET..]);
        if page_count == 0 {
            return Err(not_a_database("page count is zero"));
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&data[SALT_OFFSET..(SALT_OFFSET + SALT_SIZE)]);

        Ok(Self {
            encrypted: data[FLAGS_OFFSET] & ENCRYPTED != 0,
            page_size,
            salt,
            page_count,
            payload_length: get_u64(&data[PAYLOAD_LENGTH_OFFSET..]),
            row_count: get_u64(&data[ROW_COUNT_OFFSET..]),
        })
    }

    /// Length the file must have for this header to describe it completely, or `None` if the
    /// page count cannot describe any real file
    pub(crate) fn file_len(&self) -> Option<u64> {
        self.page_count.checked_mul(u64::from(self.page_size))
    }
}

/// Header check for unencrypted databases
pub(crate) fn plaintext_check(header: &[u8]) -> [u8; 32] {
    Sha256::digest(header).into()
}
