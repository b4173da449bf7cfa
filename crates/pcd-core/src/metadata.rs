//! VM metadata chunking
//!
//! OpenStack refuses metadata values longer than 255 characters, so the
//! build instructions travel as numbered chunks next to a chunk count:
//!
//! ```text
//! build_name                    = "nightly"
//! build_instructions_num_chunks = "2"
//! build_instructions_0          = "{\"build\":[ ... 254 chars ..."
//! build_instructions_1          = "... rest ...}"
//! ```
//!
//! Reading the metadata back concatenates the chunks in index order and
//! exposes the result under [`INSTRUCTIONS_KEY`].

use crate::error::MetadataError;
use std::collections::BTreeMap;

/// Metadata key/value pairs attached to a VM
pub type VmMetadata = BTreeMap<String, String>;

/// Largest value OpenStack accepts for a single metadata entry
pub const MAX_VALUE_LEN: usize = 255;

/// Characters per instruction chunk
pub const CHUNK_SIZE: usize = 254;

/// Key carrying the build name
pub const BUILD_NAME_KEY: &str = "build_name";

/// Key carrying the reassembled instructions
pub const INSTRUCTIONS_KEY: &str = "build_instructions";

/// Key carrying the number of instruction chunks
pub const NUM_CHUNKS_KEY: &str = "build_instructions_num_chunks";

/// Metadata key of the chunk at `index`
#[inline]
#[must_use]
pub fn chunk_key(index: usize) -> String {
    format!("{INSTRUCTIONS_KEY}_{index}")
}

/// Split `text` into consecutive chunks of at most [`CHUNK_SIZE`] characters.
///
/// Chunks never cut a character in half. The empty string yields no chunks.
#[must_use]
pub fn split_into_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::with_capacity(text.len() / CHUNK_SIZE + 1);
    let mut current = String::new();
    let mut len = 0;

    for ch in text.chars() {
        current.push(ch);
        len += 1;
        if len == CHUNK_SIZE {
            chunks.push(std::mem::take(&mut current));
            len = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Build the metadata for a new build VM: its name plus the chunked instructions.
#[must_use]
pub fn compose_vm_metadata(build_name: &str, instructions: &str) -> VmMetadata {
    let chunks = split_into_chunks(instructions);

    let mut metadata = VmMetadata::new();
    metadata.insert(BUILD_NAME_KEY.to_string(), build_name.to_string());
    metadata.insert(NUM_CHUNKS_KEY.to_string(), chunks.len().to_string());
    for (index, chunk) in chunks.into_iter().enumerate() {
        metadata.insert(chunk_key(index), chunk);
    }

    metadata
}

/// Reassemble chunked instructions in `metadata`.
///
/// Metadata without a chunk count is returned untouched. Otherwise the count
/// and chunk entries are replaced by a single [`INSTRUCTIONS_KEY`] entry;
/// unrelated keys are preserved.
///
/// # Errors
/// - [`MetadataError::InvalidChunkCount`] if the count is not a number
/// - [`MetadataError::MissingChunk`] if a counted chunk is absent
pub fn merge_instruction_chunks(mut metadata: VmMetadata) -> Result<VmMetadata, MetadataError> {
    let Some(raw_count) = metadata.remove(NUM_CHUNKS_KEY) else {
        return Ok(metadata);
    };

    let count: usize = raw_count
        .trim()
        .parse()
        .map_err(|_| MetadataError::InvalidChunkCount(raw_count.clone()))?;

    tracing::debug!("assembling `{}` VM metadata from {} pieces", INSTRUCTIONS_KEY, count);

    let mut assembled = String::new();
    for index in 0..count {
        let chunk = metadata
            .remove(&chunk_key(index))
            .ok_or(MetadataError::MissingChunk(index))?;
        assembled.push_str(&chunk);
    }

    metadata.insert(INSTRUCTIONS_KEY.to_string(), assembled);
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_into_chunks("{}"), vec!["{}".to_string()]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_into_chunks("").is_empty());

        let metadata = compose_vm_metadata("b", "");
        assert_eq!(metadata[NUM_CHUNKS_KEY], "0");

        let merged = merge_instruction_chunks(metadata).unwrap();
        assert_eq!(merged[INSTRUCTIONS_KEY], "");
    }

    #[test]
    fn chunks_respect_value_limit() {
        let text = "x".repeat(CHUNK_SIZE * 3 + 7);
        let chunks = split_into_chunks(&text);

        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_VALUE_LEN));
        assert_eq!(chunks[3].len(), 7);
    }

    #[test]
    fn exact_multiple_has_no_trailing_chunk() {
        let text = "y".repeat(CHUNK_SIZE * 2);
        assert_eq!(split_into_chunks(&text).len(), 2);
    }

    #[test]
    fn multibyte_characters_are_not_split() {
        let text = "é".repeat(CHUNK_SIZE + 1);
        let chunks = split_into_chunks(&text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), CHUNK_SIZE);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn merge_round_trips_and_removes_chunk_keys() {
        let instructions = format!(
            r#"{{"build":[{{"repo":"https://github.com/phenotips/{}","branch":"master","command":"mvn install"}}]}}"#,
            "a".repeat(600)
        );

        let mut metadata = compose_vm_metadata("nightly", &instructions);
        metadata.insert("owner".to_string(), "qa".to_string());

        let merged = merge_instruction_chunks(metadata).unwrap();

        assert_eq!(merged[INSTRUCTIONS_KEY], instructions);
        assert_eq!(merged[BUILD_NAME_KEY], "nightly");
        assert_eq!(merged["owner"], "qa");
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn metadata_without_count_is_untouched() {
        let mut metadata = VmMetadata::new();
        metadata.insert("build_instructions_0".to_string(), "orphan".to_string());

        let merged = merge_instruction_chunks(metadata.clone()).unwrap();
        assert_eq!(merged, metadata);
    }

    #[test]
    fn missing_chunk_is_reported() {
        let mut metadata = compose_vm_metadata("b", &"z".repeat(CHUNK_SIZE + 1));
        metadata.remove(&chunk_key(1));

        assert_eq!(
            merge_instruction_chunks(metadata),
            Err(MetadataError::MissingChunk(1))
        );
    }

    #[test]
    fn invalid_count_is_reported() {
        let mut metadata = VmMetadata::new();
        metadata.insert(NUM_CHUNKS_KEY.to_string(), "two".to_string());

        assert_eq!(
            merge_instruction_chunks(metadata),
            Err(MetadataError::InvalidChunkCount("two".to_string()))
        );
    }
}
