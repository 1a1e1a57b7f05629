//! Output file names: `<identifier>_<YYYYMMDD_HHmmss_fff>_<TAG>[_<seq>].<ext>`

use super::event::CaptureInstant;
use super::stream::StreamKind;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

#[derive(Debug, Clone)]
pub struct FileNamer {
    identifier: String,
    sequence_suffix: bool,
}

impl FileNamer {
    pub fn new(identifier: impl Into<String>, sequence_suffix: bool) -> Self {
        Self {
            identifier: identifier.into(),
            sequence_suffix,
        }
    }

    pub fn file_name(&self, instant: &CaptureInstant, kind: StreamKind, sequence: u64) -> String {
        let stamp = instant.utc.format(TIMESTAMP_FORMAT);
        if self.sequence_suffix {
            format!(
                "{}_{}_{}_{}.{}",
                self.identifier,
                stamp,
                kind.tag(),
                sequence,
                kind.extension()
            )
        } else {
            format!(
                "{}_{}_{}.{}",
                self.identifier,
                stamp,
                kind.tag(),
                kind.extension()
            )
        }
    }
}
