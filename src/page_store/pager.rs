use super::header::{plaintext_check, CHECK_OFFSET, CHECK_SIZE};
use super::{DatabaseHeader, StorageBackend, DB_HEADER_SIZE};
use crate::codec::utils::generate_salt;
use crate::codec::{CodecParams, PageCodec};
use crate::{DatabaseError, StorageError};
use std::cmp::{max, min};
use std::io;

/// Page-granular access to a database file
///
/// Page 0 is the plaintext header. Pages 1.. carry the payload stream, `usable_size()` bytes
/// of it per page, run through the codec when the file is encrypted.
#[derive(Debug)]
pub(crate) struct Pager {
    backend: Box<dyn StorageBackend>,
    codec: Option<PageCodec>,
    header: DatabaseHeader,
    usable: usize,
}

impl Pager {
    /// Opens an existing file, failing with [`DatabaseError::NotADatabase`] if it does not decode
    /// under `params`
    pub(crate) fn open(
        backend: Box<dyn StorageBackend>,
        params: &CodecParams,
    ) -> Result<Self, DatabaseError> {
        let len = backend.len()?;
        if len < DB_HEADER_SIZE as u64 {
            return Err(DatabaseError::NotADatabase("file is too short".to_string()));
        }
        let mut raw = [0u8; DB_HEADER_SIZE];
        backend.read(0, &mut raw)?;
        let header = DatabaseHeader::from_bytes(&raw)?;

        let (codec, usable) = match (&params.encryption, header.encrypted) {
            (Some(encryption), true) => {
                if header.page_size != params.page_size {
                    return Err(DatabaseError::NotADatabase(format!(
                        "page size is {}, expected {}",
                        header.page_size, params.page_size
                    )));
                }
                let codec = PageCodec::new(encryption, &header.salt)?;
                let check = &raw[CHECK_OFFSET..(CHECK_OFFSET + codec.mac_size())];
                if !codec.verify_header(&raw[..CHECK_OFFSET], check)? {
                    return Err(DatabaseError::NotADatabase(
                        "header failed authentication".to_string(),
                    ));
                }
                (Some(codec), params.usable_size())
            }
            (None, false) => {
                let expected = plaintext_check(&raw[..CHECK_OFFSET]);
                if raw[CHECK_OFFSET..(CHECK_OFFSET + expected.len())] != expected {
                    return Err(DatabaseError::NotADatabase(
                        "header checksum mismatch".to_string(),
                    ));
                }
                (None, header.page_size as usize)
            }
            (Some(_), false) => {
                return Err(DatabaseError::NotADatabase(
                    "file is not encrypted".to_string(),
                ));
            }
            (None, true) => {
                return Err(DatabaseError::NotADatabase("file is encrypted".to_string()));
            }
        };

        let Some(file_len) = header.file_len() else {
            return Err(DatabaseError::NotADatabase(format!(
                "page count {} is out of range",
                header.page_count
            )));
        };
        if len < file_len {
            return Err(DatabaseError::NotADatabase(format!(
                "file is truncated: {len} bytes, header describes {file_len}"
            )));
        }
        // page_count >= 1 and page_count * page_size fits, so this cannot overflow
        if header.payload_length > (header.page_count - 1) * usable as u64 {
            return Err(DatabaseError::NotADatabase(
                "payload length exceeds page count".to_string(),
            ));
        }

        Ok(Self {
            backend,
            codec,
            header,
            usable,
        })
    }

    /// Initializes an empty database in `backend` and writes its header
    pub(crate) fn create(
        backend: Box<dyn StorageBackend>,
        params: &CodecParams,
    ) -> Result<Self, DatabaseError> {
        let pager = Self::create_unsealed(backend, params)?;
        pager.backend.set_len(0)?;
        pager.commit_header()?;
        Ok(pager)
    }

    /// Like [`Pager::create`] but leaves page 0 unwritten. The file does not open until the
    /// header is committed by [`PayloadWriter::finish`]
    pub(crate) fn create_unsealed(
        backend: Box<dyn StorageBackend>,
        params: &CodecParams,
    ) -> Result<Self, StorageError> {
        let (codec, salt) = match &params.encryption {
            Some(encryption) => {
                let salt = generate_salt()?;
                (Some(PageCodec::new(encryption, &salt)?), Some(salt))
            }
            None => (None, None),
        };

        Ok(Self {
            backend,
            codec,
            header: DatabaseHeader::new(params.page_size, salt),
            usable: params.usable_size(),
        })
    }

    pub(crate) fn page_size(&self) -> u32 {
        self.header.page_size
    }

    pub(crate) fn page_count(&self) -> u64 {
        self.header.page_count
    }

    pub(crate) fn payload_length(&self) -> u64 {
        self.header.payload_length
    }

    pub(crate) fn row_count(&self) -> u64 {
        self.header.row_count
    }

    fn page_offset(&self, page_number: u64) -> u64 {
        page_number * u64::from(self.header.page_size)
    }

    /// Returns the decoded usable bytes of a payload page
    pub(crate) fn read_page(&self, page_number: u64) -> Result<Vec<u8>, StorageError> {
        if page_number == 0 || page_number >= self.header.page_count {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("page {page_number} is out of range"),
            )));
        }

        let mut page = vec![0u8; self.header.page_size as usize];
        self.backend.read(self.page_offset(page_number), &mut page)?;
        match &self.codec {
            Some(codec) => codec.decode(page_number, &page),
            None => Ok(page),
        }
    }

    pub(crate) fn write_page(&self, page_number: u64, data: &[u8]) -> Result<(), StorageError> {
        debug_assert!(page_number > 0);
        debug_assert_eq!(data.len(), self.usable);

        let offset = self.page_offset(page_number);
        match &self.codec {
            Some(codec) => self.backend.write(offset, &codec.encode(page_number, data)?)?,
            None => self.backend.write(offset, data)?,
        }
        Ok(())
    }

    /// Appends `data` to the payload stream and commits the header. Nothing appended is visible
    /// until the header write lands
    pub(crate) fn append_payload(&mut self, data: &[u8], rows: u64) -> Result<(), StorageError> {
        let usable = self.usable as u64;
        let mut offset = self.header.payload_length;
        let mut remaining = data;

        while !remaining.is_empty() {
            let page_number = 1 + offset / usable;
            let in_page = (offset % usable) as usize;
            let mut page = if in_page > 0 {
                self.read_page(page_number)?
            } else {
                vec![0u8; self.usable]
            };
            let len = min(self.usable - in_page, remaining.len());
            page[in_page..(in_page + len)].copy_from_slice(&remaining[..len]);
            self.write_page(page_number, &page)?;

            offset += len as u64;
            remaining = &remaining[len..];
        }

        let mut header = self.header.clone();
        header.payload_length = offset;
        header.row_count += rows;
        header.page_count = max(header.page_count, 1 + offset.div_ceil(usable));
        self.backend.sync_data()?;
        self.write_header(&header)?;
        self.header = header;
        Ok(())
    }

    pub(crate) fn read_payload(&self) -> Result<Vec<u8>, StorageError> {
        let expected = self.header.payload_length as usize;
        let mut payload = Vec::with_capacity(expected);
        for page_number in 1..self.header.page_count {
            if payload.len() >= expected {
                break;
            }
            payload.extend_from_slice(&self.read_page(page_number)?);
        }
        if payload.len() < expected {
            return Err(StorageError::Corrupted(format!(
                "payload is {} bytes, header describes {expected}",
                payload.len()
            )));
        }
        payload.truncate(expected);

        Ok(payload)
    }

    /// Writes the full header page and syncs
    pub(crate) fn commit_header(&self) -> Result<(), StorageError> {
        self.write_header(&self.header)
    }

    fn write_header(&self, header: &DatabaseHeader) -> Result<(), StorageError> {
        let mut page = vec![0u8; header.page_size as usize];
        page[..CHECK_OFFSET].copy_from_slice(&header.to_bytes());
        let check = match &self.codec {
            Some(codec) => codec.header_check(&page[..CHECK_OFFSET])?,
            None => plaintext_check(&page[..CHECK_OFFSET]).to_vec(),
        };
        debug_assert!(check.len() <= CHECK_SIZE);
        page[CHECK_OFFSET..(CHECK_OFFSET + check.len())].copy_from_slice(&check);

        self.backend.write(0, &page)?;
        self.backend.sync_data()?;
        Ok(())
    }

    /// Streams a fresh payload into an empty pager
    pub(crate) fn payload_writer(&mut self) -> PayloadWriter<'_> {
        debug_assert_eq!(self.header.payload_length, 0);
        let usable = self.usable;
        PayloadWriter {
            pager: self,
            buffer: Vec::with_capacity(usable),
            next_page: 1,
            written: 0,
        }
    }
}

pub(crate) struct PayloadWriter<'a> {
    pager: &'a mut Pager,
    buffer: Vec<u8>,
    next_page: u64,
    written: u64,
}

impl PayloadWriter<'_> {
    pub(crate) fn push(&mut self, mut data: &[u8]) -> Result<(), StorageError> {
        while !data.is_empty() {
            let len = min(self.pager.usable - self.buffer.len(), data.len());
            self.buffer.extend_from_slice(&data[..len]);
            self.written += len as u64;
            data = &data[len..];
            if self.buffer.len() == self.pager.usable {
                self.flush_page()?;
            }
        }
        Ok(())
    }

    fn flush_page(&mut self) -> Result<(), StorageError> {
        self.pager.write_page(self.next_page, &self.buffer)?;
        self.buffer.clear();
        self.next_page += 1;
        Ok(())
    }

    /// Pads out the last page, syncs every page, then commits the header
    pub(crate) fn finish(mut self, row_count: u64) -> Result<(), StorageError> {
        if !self.buffer.is_empty() {
            self.buffer.resize(self.pager.usable, 0);
            self.flush_page()?;
        }

        let mut header = self.pager.header.clone();
        header.page_count = self.next_page;
        header.payload_length = self.written;
        header.row_count = row_count;
        let file_len = header.file_len().ok_or_else(|| {
            StorageError::Corrupted(format!("{} pages do not fit in a file", self.next_page))
        })?;

        self.pager.backend.set_len(file_len)?;
        self.pager.backend.sync_data()?;
        self.pager.write_header(&header)?;
        self.pager.header = header;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_store::InMemoryBackend;
    use crate::{CodecConfig, CodecRegistry};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const KEY: &[u8] = b"01234567890123456789012345678901";

    // Shares storage between pagers so a test can reopen what it wrote
    #[derive(Debug, Clone)]
    struct SharedBackend(Arc<InMemoryBackend>);

    impl StorageBackend for SharedBackend {
        fn len(&self) -> Result<u64, io::Error> {
            self.0.len()
        }

        fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), io::Error> {
            self.0.read(offset, out)
        }

        fn set_len(&self, len: u64) -> Result<(), io::Error> {
            self.0.set_len(len)
        }

        fn sync_data(&self) -> Result<(), io::Error> {
            self.0.sync_data()
        }

        fn write(&self, offset: u64, data: &[u8]) -> Result<(), io::Error> {
            self.0.write(offset, data)
        }
    }

    fn shared() -> SharedBackend {
        SharedBackend(Arc::new(InMemoryBackend::new()))
    }

    fn params(config: &CodecConfig) -> CodecParams {
        CodecRegistry::default().validate(config).unwrap()
    }

    fn encrypted(page_size: u32) -> CodecParams {
        params(&CodecConfig::encrypted(
            "aes-256-gcm",
            "SHA256",
            "KDF_SHA256",
            KEY,
            10,
            page_size,
        ))
    }

    #[test]
    fn create_then_open() {
        let storage = shared();
        let params = encrypted(1024);
        let pager = Pager::create(Box::new(storage.clone()), &params).unwrap();
        assert_eq!(pager.page_count(), 1);
        assert_eq!(storage.len().unwrap(), 1024);

        let reopened = Pager::open(Box::new(storage), &params).unwrap();
        assert_eq!(reopened.payload_length(), 0);
        assert_eq!(reopened.page_size(), 1024);
    }

    #[test]
    fn append_spans_pages() {
        let storage = shared();
        let params = encrypted(512);
        let mut pager = Pager::create(Box::new(storage.clone()), &params).unwrap();
        let usable = params.usable_size();

        let first: Vec<u8> = (0..usable + 10).map(|i| i as u8).collect();
        pager.append_payload(&first, 1).unwrap();
        pager.append_payload(b"tail", 1).unwrap();
        assert_eq!(pager.page_count(), 3);

        let reopened = Pager::open(Box::new(storage), &params).unwrap();
        let mut expected = first;
        expected.extend_from_slice(b"tail");
        assert_eq!(reopened.read_payload().unwrap(), expected);
        assert_eq!(reopened.row_count(), 2);
    }

    #[test]
    fn plaintext_adopts_header_page_size() {
        let storage = shared();
        Pager::create(Box::new(storage.clone()), &params(&CodecConfig::plaintext(1024))).unwrap();
        let pager = Pager::open(Box::new(storage), &params(&CodecConfig::plaintext(4096))).unwrap();
        assert_eq!(pager.page_size(), 1024);
    }

    #[test]
    fn wrong_config_is_not_a_database() {
        let storage = shared();
        Pager::create(Box::new(storage.clone()), &encrypted(1024)).unwrap();

        let wrong_key = params(&CodecConfig::encrypted(
            "aes-256-gcm",
            "SHA256",
            "KDF_SHA256",
            &[0u8; 32],
            10,
            1024,
        ));
        for attempt in [
            wrong_key,
            encrypted(4096),
            params(&CodecConfig::plaintext(1024)),
        ] {
            assert!(matches!(
                Pager::open(Box::new(storage.clone()), &attempt),
                Err(DatabaseError::NotADatabase(_))
            ));
        }
    }

    #[test]
    fn empty_storage_is_not_a_database() {
        assert!(matches!(
            Pager::open(Box::new(InMemoryBackend::new()), &encrypted(1024)),
            Err(DatabaseError::NotADatabase(_))
        ));
    }

    #[test]
    fn tampered_page_is_corrupted() {
        let storage = shared();
        let params = encrypted(1024);
        let mut pager = Pager::create(Box::new(storage.clone()), &params).unwrap();
        pager.append_payload(&[1u8; 100], 1).unwrap();

        storage.write(1024 + 5, &[0xFF]).unwrap();
        let reopened = Pager::open(Box::new(storage), &params).unwrap();
        assert!(matches!(
            reopened.read_payload(),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn unsealed_until_finished() {
        let storage = shared();
        let params = encrypted(1024);
        let mut pager = Pager::create_unsealed(Box::new(storage.clone()), &params).unwrap();

        let mut writer = pager.payload_writer();
        writer.push(&[9u8; 2000]).unwrap();
        assert!(Pager::open(Box::new(storage.clone()), &params).is_err());
        writer.finish(4).unwrap();

        let reopened = Pager::open(Box::new(storage.clone()), &params).unwrap();
        assert_eq!(reopened.read_payload().unwrap(), vec![9u8; 2000]);
        assert_eq!(reopened.row_count(), 4);
        assert_eq!(storage.len().unwrap(), reopened.page_count() * 1024);
    }

    #[test]
    fn oversized_page_count_is_not_a_database() {
        let storage = InMemoryBackend::new();
        let mut header = DatabaseHeader::new(1024, None);
        header.page_count = u64::MAX / 2;
        let mut page = vec![0u8; 1024];
        page[..CHECK_OFFSET].copy_from_slice(&header.to_bytes());
        let check = plaintext_check(&page[..CHECK_OFFSET]);
        page[CHECK_OFFSET..(CHECK_OFFSET + check.len())].copy_from_slice(&check);
        storage.write(0, &page).unwrap();

        assert!(matches!(
            Pager::open(Box::new(storage), &params(&CodecConfig::plaintext(1024))),
            Err(DatabaseError::NotADatabase(_))
        ));
    }

    // Fails every sync while armed
    #[derive(Debug, Clone)]
    struct FlakySync {
        inner: SharedBackend,
        fail: Arc<AtomicBool>,
    }

    impl StorageBackend for FlakySync {
        fn len(&self) -> Result<u64, io::Error> {
            self.inner.len()
        }

        fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), io::Error> {
            self.inner.read(offset, out)
        }

        fn set_len(&self, len: u64) -> Result<(), io::Error> {
            self.inner.set_len(len)
        }

        fn sync_data(&self) -> Result<(), io::Error> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::other("sync failed"));
            }
            self.inner.sync_data()
        }

        fn write(&self, offset: u64, data: &[u8]) -> Result<(), io::Error> {
            self.inner.write(offset, data)
        }
    }

    #[test]
    fn failed_append_keeps_header() {
        let storage = shared();
        let fail = Arc::new(AtomicBool::new(false));
        let backend = FlakySync {
            inner: storage.clone(),
            fail: fail.clone(),
        };
        let params = encrypted(1024);
        let mut pager = Pager::create(Box::new(backend), &params).unwrap();
        pager.append_payload(b"first", 1).unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(pager.append_payload(&[7u8; 3000], 5).is_err());
        assert_eq!(pager.payload_length(), 5);
        assert_eq!(pager.row_count(), 1);
        assert_eq!(pager.page_count(), 2);
        assert_eq!(pager.read_payload().unwrap(), b"first".to_vec());

        fail.store(false, Ordering::SeqCst);
        pager.append_payload(b"second", 1).unwrap();
        let reopened = Pager::open(Box::new(storage), &params).unwrap();
        assert_eq!(reopened.read_payload().unwrap(), b"firstsecond".to_vec());
        assert_eq!(reopened.row_count(), 2);
    }

    #[test]
    fn read_page_bounds() {
        let pager = Pager::create(Box::new(InMemoryBackend::new()), &encrypted(1024)).unwrap();
        assert!(pager.read_page(0).is_err());
        assert!(pager.read_page(1).is_err());
    }
}
