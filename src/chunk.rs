//! Overlapping character-window text splitter.
//!
//! Splits loaded sections into [`Chunk`]s bounded by a configured character
//! budget, with a configured overlap between consecutive chunks. Cuts
//! prefer newline, then space boundaries. Each chunk carries the line range
//! it spans in the source file; chunk order is the order later stages rely
//! on when zipping chunks with vectors.

use crate::loader::Section;
use crate::models::Chunk;

/// Split every section into chunks, preserving section order.
/// `chunk_overlap` must be smaller than `chunk_size` (validated at startup).
pub fn split_sections(sections: &[Section], chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for section in sections {
        split_section(section, chunk_size, chunk_overlap, &mut chunks);
    }
    chunks
}

fn split_section(section: &Section, max_chars: usize, overlap: usize, out: &mut Vec<Chunk>) {
    let text = section.text.as_str();

    // Byte offset of every char, plus a sentinel for the end of the text.
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    offsets.push(text.len());
    let total_chars = offsets.len() - 1;

    if total_chars == 0 {
        return;
    }

    let mut start = 0usize; // char index
    loop {
        let mut end = (start + max_chars).min(total_chars);

        if end < total_chars {
            // Prefer cutting after a newline or space inside the window,
            // as long as that leaves more than the overlap behind.
            let window = &text[offsets[start]..offsets[end]];
            if let Some(pos) = window.rfind('\n').or_else(|| window.rfind(' ')) {
                let snapped = window[..pos].chars().count() + 1;
                if snapped > overlap {
                    end = start + snapped;
                }
            }
        }

        let piece = &text[offsets[start]..offsets[end]];
        let trimmed = piece.trim_end();
        if !trimmed.trim().is_empty() {
            let from_line = section.from_line + count_lines(&text[..offsets[start]]);
            out.push(Chunk {
                text: trimmed.to_string(),
                from_line,
                to_line: from_line + count_lines(trimmed),
            });
        }

        if end >= total_chars {
            break;
        }
        start = end - overlap;
    }
}

fn count_lines(s: &str) -> usize {
    s.matches('\n').count()
}
