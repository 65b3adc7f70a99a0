//! Writing page markers into tag user memory.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::detect::TagSource;
use crate::protocol::constants::{BLOCK_SIZE, USER_DATA_BLOCK};
use crate::reader::ExchangeError;
use crate::tag::{PageBlock, TagRecord, parse_page_content};

pub const DEFAULT_TAG_WAIT: Duration = Duration::from_secs(30);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("No tag presented within {timeout_ms}ms")]
    NoTag { timeout_ms: u64 },

    #[error("Page {page} is outside 1-{total_pages}")]
    PageOutOfRange { page: u32, total_pages: u32 },

    #[error("Read-back of tag {uid} does not match the written page marker")]
    VerifyFailed { uid: String },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl WriteError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, WriteError::Exchange(e) if e.is_fatal())
    }
}

/// A page marker successfully written and verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenTag {
    pub page: u32,
    pub uid: String,
}

/// Content of a tag's user block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagContent {
    pub uid: String,
    pub block: [u8; BLOCK_SIZE],
    pub page: Option<u32>,
    pub marker: Option<PageBlock>,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub written: Vec<WrittenTag>,
    pub failed: Vec<u32>,
}

/// Progress callbacks for [`PageTagWriter::write_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchProgress {
    Waiting { page: u32, total_pages: u32 },
    Written(WrittenTag),
    Failed { page: u32, reason: String },
}

/// Writes [`PageBlock`]s to block 4 of tags presented one at a time.
pub struct PageTagWriter<S: TagSource> {
    source: S,
    poll_interval: Duration,
}

impl<S: TagSource> PageTagWriter<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            poll_interval: WAIT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Block until a tag other than `exclude_uid` is in the field.
    pub fn wait_for_tag(
        &mut self,
        timeout: Duration,
        exclude_uid: Option<&str>,
    ) -> Result<TagRecord, WriteError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.source.detect(1) {
                Ok(tags) => {
                    let mut fresh = tags
                        .into_iter()
                        .filter(|t| Some(t.uid_hex.as_str()) != exclude_uid);
                    if let Some(tag) = fresh.next() {
                        return Ok(tag);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) => {}
            }
            if Instant::now() >= deadline {
                return Err(WriteError::NoTag {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            if !self.poll_interval.is_zero() {
                thread::sleep(self.poll_interval);
            }
        }
    }

    /// Write the marker for `page` to the next presented tag and verify it.
    pub fn write_page(
        &mut self,
        page: u32,
        total_pages: u32,
        timeout: Duration,
        exclude_uid: Option<&str>,
    ) -> Result<WrittenTag, WriteError> {
        let marker = marker_for(page, total_pages)?;
        let tag = self.wait_for_tag(timeout, exclude_uid)?;
        self.write_marker(&tag, &marker)
    }

    /// Write and read back. Only the marker header is compared: NTAG21x
    /// stores four bytes per write but reads back sixteen.
    fn write_marker(
        &mut self,
        tag: &TagRecord,
        marker: &PageBlock,
    ) -> Result<WrittenTag, WriteError> {
        let block = marker.to_bytes();
        self.source.write_block(tag.target, USER_DATA_BLOCK, &block)?;

        let readback = self.source.read_block(tag.target, USER_DATA_BLOCK)?;
        if readback[..PageBlock::HEADER_LEN] != block[..PageBlock::HEADER_LEN] {
            return Err(WriteError::VerifyFailed {
                uid: tag.uid_hex.clone(),
            });
        }

        info!(page = marker.page, uid = %tag.uid_hex, "Page tag written");
        Ok(WrittenTag {
            page: marker.page as u32,
            uid: tag.uid_hex.clone(),
        })
    }

    /// Write pages 1..=total_pages, each to a tag different from the previous.
    ///
    /// A failed page is recorded and skipped; a lost reader ends the batch.
    /// The tag tried for a failed page still counts as the previous tag, so
    /// it is not reused for the next page while it sits on the reader.
    pub fn write_all(
        &mut self,
        total_pages: u32,
        timeout: Duration,
        mut progress: impl FnMut(&BatchProgress),
    ) -> Result<BatchReport, WriteError> {
        let mut report = BatchReport::default();
        let mut previous: Option<String> = None;

        for page in 1..=total_pages {
            progress(&BatchProgress::Waiting { page, total_pages });
            let result = marker_for(page, total_pages).and_then(|marker| {
                let tag = self.wait_for_tag(timeout, previous.as_deref())?;
                previous = Some(tag.uid_hex.clone());
                self.write_marker(&tag, &marker)
            });
            match result {
                Ok(written) => {
                    progress(&BatchProgress::Written(written.clone()));
                    report.written.push(written);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(page, error = %e, "Page tag not written");
                    progress(&BatchProgress::Failed {
                        page,
                        reason: e.to_string(),
                    });
                    report.failed.push(page);
                }
            }
        }
        Ok(report)
    }

    /// Read and decode the user block of the next presented tag.
    pub fn read_page(
        &mut self,
        timeout: Duration,
        total_pages: u32,
    ) -> Result<TagContent, WriteError> {
        let tag = self.wait_for_tag(timeout, None)?;
        let block = self.source.read_block(tag.target, USER_DATA_BLOCK)?;
        Ok(TagContent {
            uid: tag.uid_hex,
            page: parse_page_content(&block, total_pages),
            marker: PageBlock::from_bytes(&block),
            block,
        })
    }
}

fn marker_for(page: u32, total_pages: u32) -> Result<PageBlock, WriteError> {
    match (u8::try_from(page), u8::try_from(total_pages)) {
        (Ok(page_byte), Ok(total_byte)) if page_byte >= 1 && page <= total_pages => {
            Ok(PageBlock::new(page_byte, total_byte))
        }
        _ => Err(WriteError::PageOutOfRange { page, total_pages }),
    }
}
