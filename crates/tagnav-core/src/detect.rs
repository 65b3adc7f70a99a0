//! Passive target detection and tag memory access.

use std::time::Instant;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, warn};

use crate::protocol::ProtocolError;
use crate::protocol::constants::*;
use crate::reader::{ExchangeError, Pn532};
use crate::tag::TagRecord;
use crate::transport::Transport;

/// Smallest single-target response: NbTg, Tg, SENS_RES(2), SEL_RES, NFCIDLength, NFCID(1+).
const MIN_SINGLE_RESPONSE: usize = 7;
/// Fixed part of a target record before the UID.
const RECORD_HEADER: usize = 5;

/// Anything that can report tags in the field and access their memory.
///
/// The navigation session and the tag writer both consume this trait; the
/// PN532 reader is one implementation.
pub trait TagSource {
    /// Detect up to `max_targets` tags (the hardware caps this at two).
    fn detect(&mut self, max_targets: u8) -> Result<Vec<TagRecord>, ExchangeError>;

    /// Read one 16-byte block from a detected target.
    fn read_block(&mut self, target: u8, block: u8) -> Result<[u8; BLOCK_SIZE], ExchangeError>;

    /// Write one 16-byte block to a detected target.
    fn write_block(
        &mut self,
        target: u8,
        block: u8,
        data: &[u8; BLOCK_SIZE],
    ) -> Result<(), ExchangeError>;
}

/// Parse an InListPassiveTarget response for a single target.
pub fn parse_single(data: &[u8], detected_at: Instant) -> Option<TagRecord> {
    if data.len() < MIN_SINGLE_RESPONSE || data[0] == 0 {
        return None;
    }
    parse_targets(data, detected_at).into_iter().next()
}

/// Parse an InListPassiveTarget response holding `NbTg` target records.
///
/// Each record advances the offset by its declared size. A record whose
/// declared length runs past the buffer ends parsing; the records before it
/// are returned.
pub fn parse_targets(data: &[u8], detected_at: Instant) -> Vec<TagRecord> {
    let Some((&count, mut rest)) = data.split_first() else {
        return Vec::new();
    };

    let mut tags = Vec::with_capacity(count as usize);
    for index in 0..count {
        if rest.len() < RECORD_HEADER {
            debug!(index, remaining = rest.len(), "Target record header truncated");
            break;
        }
        let target = rest[0];
        let sens_res = BigEndian::read_u16(&rest[1..3]);
        let sel_res = rest[3];
        let uid_len = rest[4] as usize;

        let uid_end = RECORD_HEADER + uid_len;
        if uid_len == 0 || uid_end > rest.len() {
            debug!(index, uid_len, remaining = rest.len(), "Target UID overruns response");
            break;
        }

        let uid = &rest[RECORD_HEADER..uid_end];
        let mut tag = TagRecord::new(target, sens_res, sel_res, uid, detected_at);
        let mut record_end = uid_end;

        if sel_res & SEL_RES_ISO_DEP != 0 {
            // ATS length byte counts itself.
            let Some(&ats_len) = rest.get(uid_end) else {
                debug!(index, "ATS length missing");
                break;
            };
            let ats_end = uid_end + (ats_len as usize).max(1);
            if ats_end > rest.len() {
                debug!(index, ats_len, "ATS overruns response");
                break;
            }
            tag.ats = Some(rest[uid_end + 1..ats_end].to_vec());
            record_end = ats_end;
        }

        tags.push(tag);
        rest = &rest[record_end..];
    }
    tags
}

impl<T: Transport> Pn532<T> {
    /// Look for one 106 kbps Type A target.
    pub fn detect_single(&mut self) -> Result<Option<TagRecord>, ExchangeError> {
        let data = self.exchange(CMD_IN_LIST_PASSIVE_TARGET, &[1, BRTY_106K_TYPE_A])?;
        Ok(parse_single(&data, Instant::now()))
    }

    /// Look for up to `max` targets (clamped to the hardware limit of two).
    pub fn detect_multiple(&mut self, max: u8) -> Result<Vec<TagRecord>, ExchangeError> {
        let max = max.clamp(1, MAX_TARGETS);
        let data = self.exchange(CMD_IN_LIST_PASSIVE_TARGET, &[max, BRTY_106K_TYPE_A])?;
        let tags = parse_targets(&data, Instant::now());
        if data.first().is_some_and(|&n| n as usize > tags.len()) {
            warn!(declared = data[0], parsed = tags.len(), "Partial target list");
        }
        Ok(tags)
    }

    fn data_exchange(&mut self, target: u8, params: &[u8]) -> Result<Vec<u8>, ExchangeError> {
        let mut request = Vec::with_capacity(params.len() + 1);
        request.push(target);
        request.extend_from_slice(params);

        let response = self.exchange(CMD_IN_DATA_EXCHANGE, &request)?;
        let (&status, data) = response
            .split_first()
            .ok_or(ExchangeError::ShortResponse { len: 0, min: 1 })?;
        ProtocolError::check(status)?;
        Ok(data.to_vec())
    }
}

impl<T: Transport> TagSource for Pn532<T> {
    fn detect(&mut self, max_targets: u8) -> Result<Vec<TagRecord>, ExchangeError> {
        if max_targets <= 1 {
            Ok(self.detect_single()?.into_iter().collect())
        } else {
            self.detect_multiple(max_targets)
        }
    }

    fn read_block(&mut self, target: u8, block: u8) -> Result<[u8; BLOCK_SIZE], ExchangeError> {
        let data = self.data_exchange(target, &[MIFARE_CMD_READ, block])?;
        data.get(..BLOCK_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(ExchangeError::ShortResponse {
                len: data.len(),
                min: BLOCK_SIZE,
            })
    }

    fn write_block(
        &mut self,
        target: u8,
        block: u8,
        data: &[u8; BLOCK_SIZE],
    ) -> Result<(), ExchangeError> {
        let mut params = Vec::with_capacity(BLOCK_SIZE + 2);
        params.push(MIFARE_CMD_WRITE);
        params.push(block);
        params.extend_from_slice(data);
        self.data_exchange(target, &params)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn record(target: u8, sens_res: u16, sel_res: u8, uid: &[u8]) -> Vec<u8> {
        let mut bytes = vec![target];
        bytes.extend_from_slice(&sens_res.to_be_bytes());
        bytes.push(sel_res);
        bytes.push(uid.len() as u8);
        bytes.extend_from_slice(uid);
        bytes
    }

    fn response(records: &[Vec<u8>]) -> Vec<u8> {
        let mut data = vec![records.len() as u8];
        for r in records {
            data.extend_from_slice(r);
        }
        data
    }

    #[test]
    fn test_parse_single_ntag() {
        let uid = [0x04, 0xA2, 0x1B, 0x22, 0x3C, 0x5D, 0x80];
        let data = response(&[record(1, 0x0044, 0x00, &uid)]);
        let tag = parse_single(&data, Instant::now()).unwrap();
        assert_eq!(tag.target, 1);
        assert_eq!(tag.sens_res, 0x0044);
        assert_eq!(tag.uid_hex, "04a21b223c5d80");
        assert_eq!(tag.ats, None);
    }

    #[test]
    fn test_parse_single_none() {
        assert!(parse_single(&[0x00], Instant::now()).is_none());
        // Declares a target but is undersized.
        assert!(parse_single(&[0x01, 0x01, 0x00, 0x44, 0x00, 0x04], Instant::now()).is_none());
    }

    #[test]
    fn test_parse_two_targets_variable_uid() {
        let data = response(&[
            record(1, 0x0044, 0x00, &[1, 2, 3, 4, 5, 6, 7]),
            record(2, 0x0004, 0x08, &[9, 8, 7, 6]),
        ]);
        let tags = parse_targets(&data, Instant::now());
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].uid_hex, "01020304050607");
        assert_eq!(tags[1].target, 2);
        assert_eq!(tags[1].uid_hex, "09080706");
        assert_eq!(tags[1].sel_res, 0x08);
    }

    #[test]
    fn test_parse_iso_dep_skips_ats() {
        let mut first = record(1, 0x0344, 0x20, &[1, 2, 3, 4, 5, 6, 7]);
        first.extend_from_slice(&[0x05, 0x78, 0x80, 0x70, 0x02]);
        let data = response(&[first, record(2, 0x0004, 0x08, &[9, 8, 7, 6])]);

        let tags = parse_targets(&data, Instant::now());
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].ats.as_deref(), Some(&[0x78, 0x80, 0x70, 0x02][..]));
        assert_eq!(tags[1].uid_hex, "09080706");
    }

    #[test]
    fn test_truncated_second_record_keeps_first() {
        let data = response(&[
            record(1, 0x0044, 0x00, &[1, 2, 3, 4]),
            record(2, 0x0004, 0x08, &[9, 8, 7, 6, 5, 4, 3]),
        ]);
        // Every truncation point inside the second record.
        let first_end = 1 + 5 + 4;
        for cut in first_end..data.len() {
            let tags = parse_targets(&data[..cut], Instant::now());
            assert_eq!(tags.len(), 1, "cut at {}", cut);
            assert_eq!(tags[0].uid_hex, "01020304");
        }
        // Truncated inside the first record: nothing.
        for cut in 0..first_end {
            assert!(parse_targets(&data[..cut], Instant::now()).is_empty());
        }
    }

    #[test]
    fn test_detect_multiple_over_mock() {
        let mock = MockTransport::new();
        let mut pn532 = Pn532::new(mock.clone());
        mock.queue_response(
            CMD_IN_LIST_PASSIVE_TARGET,
            &response(&[
                record(1, 0x0044, 0x00, &[0xAA, 0xBB, 0xCC, 0xDD]),
                record(2, 0x0020, 0x00, &[0x11, 0x22, 0x33, 0x44]),
            ]),
        );

        let tags = pn532.detect(5).unwrap();
        assert_eq!(tags.len(), 2);
        // Requested maximum is clamped to the hardware limit.
        let sent = &mock.get_writes()[0];
        assert_eq!(&sent[6..9], &[CMD_IN_LIST_PASSIVE_TARGET, 2, BRTY_106K_TYPE_A]);
    }

    #[test]
    fn test_read_block_status() {
        let mock = MockTransport::new();
        let mut pn532 = Pn532::new(mock.clone());

        let mut ok = vec![0x00];
        ok.extend_from_slice(&[0x42; BLOCK_SIZE]);
        mock.queue_response(CMD_IN_DATA_EXCHANGE, &ok);
        assert_eq!(pn532.read_block(1, 4).unwrap(), [0x42; BLOCK_SIZE]);

        mock.queue_response(CMD_IN_DATA_EXCHANGE, &[0x14]);
        let err = pn532.read_block(1, 4).unwrap_err();
        assert!(matches!(err, ExchangeError::Protocol(ProtocolError { status: 0x14 })));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_write_block_request() {
        let mock = MockTransport::new();
        let mut pn532 = Pn532::new(mock.clone());
        mock.queue_response(CMD_IN_DATA_EXCHANGE, &[0x00]);

        pn532.write_block(1, USER_DATA_BLOCK, &[0x07; BLOCK_SIZE]).unwrap();
        let sent = &mock.get_writes()[0];
        assert_eq!(&sent[6..10], &[CMD_IN_DATA_EXCHANGE, 1, MIFARE_CMD_WRITE, USER_DATA_BLOCK]);
        assert_eq!(&sent[10..26], &[0x07; BLOCK_SIZE]);
    }
}
