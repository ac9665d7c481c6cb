use crate::storage::bucket_index::BUCKET_INDEX_FILE;
use crate::storage::codec::temp_file_name;
use crate::storage::object_index::OBJECT_INDEX_FILE;
use crate::storage::StorageError;

pub const MIN_BUCKET_NAME_LEN: usize = 3;
pub const MAX_BUCKET_NAME_LEN: usize = 63;
pub const MAX_KEY_LEN: usize = 1024;

/// Checks a bucket name against the naming policy.
///
/// 3 to 63 characters from `[a-z0-9.-]`, no leading or trailing hyphen or
/// period, and no `--` or `..` runs. Names that would shadow the bucket index
/// file are refused as well.
pub fn validate_bucket_name(name: &str) -> Result<(), StorageError> {
    if name.len() < MIN_BUCKET_NAME_LEN || name.len() > MAX_BUCKET_NAME_LEN {
        return Err(StorageError::InvalidInput(format!(
            "bucket name must be between {MIN_BUCKET_NAME_LEN} and {MAX_BUCKET_NAME_LEN} characters long"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return Err(StorageError::InvalidInput(
            "bucket name can contain only lowercase letters, numbers, hyphens, periods".into(),
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(StorageError::InvalidInput(
            "bucket name can not start or end with a hyphen".into(),
        ));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(StorageError::InvalidInput(
            "bucket name can not start or end with a period".into(),
        ));
    }
    if name.contains("--") || name.contains("..") {
        return Err(StorageError::InvalidInput(
            "bucket name can not contain consecutive hyphens or periods".into(),
        ));
    }
    if name == BUCKET_INDEX_FILE {
        return Err(StorageError::InvalidInput(format!(
            "bucket name {name} is reserved"
        )));
    }
    Ok(())
}

/// Checks an object key before it is turned into a path under the bucket.
///
/// Keys map onto the filesystem one segment per `/`, so anything that could
/// climb out of the bucket directory or land on the object index is refused.
pub fn validate_object_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidInput("key must be non-empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidInput(format!(
            "key must be at most {MAX_KEY_LEN} bytes"
        )));
    }
    if key.contains('\0') || key.contains('\\') {
        return Err(StorageError::InvalidInput(
            "key cannot contain NUL or backslash".into(),
        ));
    }
    if key.starts_with('/') {
        return Err(StorageError::InvalidInput("key cannot start with /".into()));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidInput(format!(
                "key contains an invalid path segment: {key:?}"
            )));
        }
    }
    // The first segment lives next to the bucket's index file.
    let top = key.split('/').next().unwrap_or(key);
    if top == OBJECT_INDEX_FILE || top == temp_file_name(OBJECT_INDEX_FILE) {
        return Err(StorageError::InvalidInput(format!("key {key} is reserved")));
    }
    Ok(())
}
