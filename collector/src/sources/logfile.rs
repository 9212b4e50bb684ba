//! Log-tail source: follows a rotating Pi-hole FTL-style log file.

use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Utc};
use regex::Regex;
use std::io::{Read, Seek, SeekFrom};
use std::sync::OnceLock;

use super::{DnsSource, ObservedQuery};

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^(?P<mon>\w{3})\s+(?P<day>\d{1,2})\s+(?P<time>\d{2}:\d{2}:\d{2}).*?
            query\[(?P<qtype>\w+)\]\s+(?P<domain>\S+)\s+from\s+(?P<client>\S+)",
        )
        .expect("static pattern is valid")
    })
}

fn month_number(mon: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS.iter().position(|m| *m == mon).map(|i| i as u32 + 1)
}

/// Tails a log file, detecting rotation by inode and truncation.
pub struct LogTailSource {
    path: std::path::PathBuf,
    offset: u64,
    inode: Option<u64>,
}

impl LogTailSource {
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            inode: None,
        }
    }

    fn reset_if_rotated(&mut self, metadata: &std::fs::Metadata) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let current_inode = metadata.ino();
            if self.inode != Some(current_inode) {
                self.inode = Some(current_inode);
                self.offset = 0;
                return;
            }
        }
        if metadata.len() < self.offset {
            self.offset = 0;
        }
    }

    fn parse_line(line: &str) -> Option<ObservedQuery> {
        let caps = line_pattern().captures(line)?;
        let month = month_number(&caps["mon"])?;
        let day: u32 = caps["day"].parse().ok()?;
        let time = &caps["time"];
        let mut parts = time.split(':');
        let hour: u32 = parts.next()?.parse().ok()?;
        let minute: u32 = parts.next()?.parse().ok()?;
        let second: u32 = parts.next()?.parse().ok()?;

        let year = Utc::now().year();
        let queried_at = Utc
            .with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()?;

        Some(ObservedQuery {
            domain: caps["domain"].to_string(),
            qtype: caps["qtype"].to_string(),
            client_ip: Some(caps["client"].to_string()),
            queried_at,
        })
    }
}

#[async_trait]
impl DnsSource for LogTailSource {
    async fn fetch_new(&mut self) -> anyhow::Result<Vec<ObservedQuery>> {
        let path = self.path.clone();
        let metadata = tokio::task::spawn_blocking(move || std::fs::metadata(&path)).await??;
        self.reset_if_rotated(&metadata);

        let path = self.path.clone();
        let offset = self.offset;

        let (new_offset, lines) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let mut file = std::fs::File::open(&path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = String::new();
            file.read_to_string(&mut buf)?;
            let end = file.stream_position()?;

            let lines: Vec<String> = buf.lines().map(ToString::to_string).collect();
            Ok((end, lines))
        })
        .await??;

        self.offset = new_offset;

        Ok(lines.iter().filter_map(|l| Self::parse_line(l)).collect())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_a_well_formed_ftl_line() {
        let line = "Jan 14 22:13:20 dnsmasq[1]: query[A] example.com from 10.0.0.5";
        let parsed = LogTailSource::parse_line(line).unwrap();
        assert_eq!(parsed.domain, "example.com");
        assert_eq!(parsed.qtype, "A");
        assert_eq!(parsed.client_ip.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn ignores_unrelated_lines() {
        let line = "Jan 14 22:13:20 dnsmasq[1]: reply example.com is 93.184.216.34";
        assert!(LogTailSource::parse_line(line).is_none());
    }

    #[tokio::test]
    async fn detects_truncation_and_resets_offset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Jan 14 22:13:20 dnsmasq[1]: query[A] a.com from 10.0.0.1").unwrap();

        let mut source = LogTailSource::new(file.path());
        let first = source.fetch_new().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(source.offset > 0);

        // Simulate rotation: truncate then write a shorter line.
        file.as_file().set_len(0).unwrap();
        use std::io::Seek as _;
        file.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
        writeln!(file, "Jan 14 22:14:00 dnsmasq[1]: query[A] b.com from 10.0.0.2").unwrap();

        let second = source.fetch_new().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].domain, "b.com");
    }
}
