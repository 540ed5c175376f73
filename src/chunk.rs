//! Structure-aware text chunker.
//!
//! Decomposes a [`ContentTree`] into ordered [`Chunk`]s sized for retrieval.
//! Splitting happens on structural boundaries first (one section per pack),
//! then on paragraph boundaries (`\n\n`) within a section, and only falls
//! back to a maximum-size window for oversized paragraphs. Window splits
//! land on whitespace, never inside a word.
//!
//! Each chunk receives a UUID and a SHA-256 hash of its text; indices are
//! contiguous from 0 in document order.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::content::ContentTree;

/// Smallest retrievable unit of content. Belongs to exactly one document;
/// its id is stable until the document is re-ingested.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_uri: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// Decompose a parsed tree into chunks, walking sections in document order.
pub fn chunk_tree(tree: &ContentTree, max_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for node in tree.root.descendants() {
        let Some(text) = node.text.as_deref() else {
            continue;
        };
        for piece in chunk_section(text, max_chars) {
            chunks.push(make_chunk(&tree.source_uri, index, &piece));
            index += 1;
        }
    }

    chunks
}

/// Split one section's text into pieces no larger than `max_chars`,
/// preferring paragraph boundaries.
fn chunk_section(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.chars().count()
        } else {
            buf.chars().count() + 2 + trimmed.chars().count()
        };

        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.chars().count() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(window_split(trimmed, max_chars));
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
}

/// Hard-split an oversized paragraph at whitespace boundaries. A window
/// with no interior whitespace stretches to the next whitespace rather
/// than cutting a word in half.
fn window_split(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_chars {
            pieces.push(remaining.to_string());
            break;
        }

        // Byte offset just past `max_chars` characters, and the last
        // whitespace inside that window.
        let mut limit_byte = remaining.len();
        let mut last_ws: Option<usize> = None;
        for (seen, (byte_idx, c)) in remaining.char_indices().enumerate() {
            if seen >= max_chars {
                limit_byte = byte_idx;
                break;
            }
            if c.is_whitespace() {
                last_ws = Some(byte_idx);
            }
        }

        let split_at = match last_ws {
            Some(ws) if ws > 0 => ws,
            _ => remaining[limit_byte..]
                .find(char::is_whitespace)
                .map(|off| limit_byte + off)
                .unwrap_or(remaining.len()),
        };

        let piece = remaining[..split_at].trim_end();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }

    pieces
}

fn make_chunk(document_uri: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_uri: document_uri.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
