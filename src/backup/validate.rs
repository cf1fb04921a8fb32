//! Validation functions for configuration values.

use validator::ValidationError;

/// Accepts volume UUIDs as filesystems report them: hex groups separated by
/// single dashes, e.g. `0a1b2c3d-...` for ext4 or `ABCD-1234` for FAT.
pub fn validate_uuid<S: AsRef<str>>(uuid: S) -> Result<(), ValidationError> {
    let uuid = uuid.as_ref();
    let well_formed = !uuid.is_empty()
        && uuid.split('-').all(|group| {
            !group.is_empty() && group.chars().all(|c| c.is_ascii_hexdigit())
        });
    if !well_formed {
        return Err(ValidationError::new("InvalidUuid")
            .with_message(format!("Invalid volume uuid: {uuid:?}").into()));
    }

    Ok(())
}

/// Rejects option lists with blank entries or entries that are only dashes.
pub fn validate_rsync_options<S: AsRef<str>>(options: &[S]) -> Result<(), ValidationError> {
    if let Some(bad) = options
        .iter()
        .map(AsRef::as_ref)
        .find(|option| option.trim_start_matches('-').trim().is_empty())
    {
        return Err(ValidationError::new("InvalidRsyncOption")
            .with_message(format!("Invalid rsync option: {bad:?}").into()));
    }

    Ok(())
}
