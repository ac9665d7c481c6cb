//! Flat index file format.
//!
//! Index files are comma separated with a header line. Fields that contain a
//! comma, a double quote or a line break are wrapped in double quotes with
//! inner quotes doubled, so a record may span several physical lines.

use crate::storage::StorageError;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// One logical record read back from an index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based physical line the record starts on.
    pub line: usize,
    pub fields: Result<Vec<String>, String>,
}

pub fn encode_record(fields: &[&str]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\r', '\n']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
    out
}

/// Splits a whole index document into records.
///
/// Blank lines are dropped. A quote left open at end of input marks that
/// final record as malformed instead of failing the whole document.
pub fn decode_records(text: &str) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut start_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                finish_record(&mut records, &mut fields, &mut field, start_line);
                line += 1;
                start_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        records.push(RawRecord {
            line: start_line,
            fields: Err("unterminated quoted field".to_string()),
        });
    } else {
        finish_record(&mut records, &mut fields, &mut field, start_line);
    }
    records
}

fn finish_record(
    records: &mut Vec<RawRecord>,
    fields: &mut Vec<String>,
    field: &mut String,
    line: usize,
) {
    if fields.is_empty() && field.is_empty() {
        return;
    }
    fields.push(std::mem::take(field));
    records.push(RawRecord {
        line,
        fields: Ok(std::mem::take(fields)),
    });
}

/// Reads and decodes an index file. `Ok(None)` means the file does not exist.
pub async fn read_records(path: &Path) -> Result<Option<Vec<RawRecord>>, StorageError> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(decode_records(&text))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(
            &format!("read index {}", path.display()),
            e,
        )),
    }
}

/// Name of the hidden sibling used while rewriting `file_name`.
pub fn temp_file_name(file_name: &str) -> String {
    format!(".{file_name}.tmp")
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("index");
    path.with_file_name(temp_file_name(name))
}

/// Replaces `path` with `contents` so readers see either the old or the new
/// file, never a prefix of it.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let temp_path = temp_path_for(path);
    let result = async {
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::io(&format!("create {}", temp_path.display()), e))?;
        file.write_all(contents)
            .await
            .map_err(|e| StorageError::io(&format!("write {}", temp_path.display()), e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(&format!("sync {}", temp_path.display()), e))?;
        drop(file);
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StorageError::io(&format!("replace {}", path.display()), e))
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    // The new contents are already visible, so a failed directory sync only
    // weakens crash durability.
    if let Some(parent) = path.parent() {
        if let Err(e) = sync_dir(parent).await {
            tracing::warn!(dir = %parent.display(), "failed to sync directory after rename: {e}");
        }
    }
    Ok(())
}

/// Flushes a directory entry change (such as a rename) to disk.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(records: &[RawRecord]) -> Vec<Vec<String>> {
        records
            .iter()
            .map(|r| r.fields.clone().unwrap())
            .collect()
    }

    #[test]
    fn test_plain_fields_are_not_quoted() {
        assert_eq!(encode_record(&["a", "1", "text/plain"]), "a,1,text/plain\n");
    }

    #[test]
    fn test_special_fields_survive_decoding() {
        let line = encode_record(&["a,b", "say \"hi\"", "two\nlines", ""]);
        assert_eq!(line, "\"a,b\",\"say \"\"hi\"\"\",\"two\nlines\",\n");

        let records = decode_records(&line);
        assert_eq!(records.len(), 1);
        assert_eq!(
            fields(&records),
            vec![vec!["a,b", "say \"hi\"", "two\nlines", ""]]
        );
    }

    #[test]
    fn test_line_numbers_account_for_embedded_newlines() {
        let text = "h1,h2\n\"x\ny\",1\n\nz,2\r\n";
        let records = decode_records(text);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].line, 1);
        assert_eq!(records[1].line, 2);
        assert_eq!(records[2].line, 5);
        assert_eq!(records[2].fields.clone().unwrap(), vec!["z", "2"]);
    }

    #[test]
    fn test_unterminated_quote_is_malformed() {
        let records = decode_records("ok,1\n\"broken,2\n");
        assert_eq!(records.len(), 2);
        assert!(records[0].fields.is_ok());
        assert!(records[1].fields.is_err());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = parse_timestamp("2024-05-01T12:00:00Z").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-05-01T12:00:00Z");
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.csv");

        assert!(read_records(&path).await.unwrap().is_none());

        write_atomic(&path, b"a,b\n").await.unwrap();
        write_atomic(&path, b"c,d\n").await.unwrap();

        let records = read_records(&path).await.unwrap().unwrap();
        assert_eq!(fields(&records), vec![vec!["c", "d"]]);
        assert!(!dir.path().join(".index.csv.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_atomic_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.csv");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("inside"), b"x").unwrap();

        assert!(matches!(
            write_atomic(&path, b"a,b\n").await,
            Err(StorageError::Internal(_))
        ));
        assert!(!dir.path().join(".index.csv.tmp").exists());
        assert!(path.join("inside").is_file());
    }
}
