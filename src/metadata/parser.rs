//! Parser for the line-oriented container report.
//!
//! Every line starts with one framing character (`|` or a space) followed by
//! indentation and a `+ Key: value` element. The parser cares about:
//!
//! ```text
//! |   + Name: ALBUM_ARTIST        next line carries the author
//! |   + String: Jane Doe
//! |   + Name: ALBUM               next line carries the title
//! |   + String: A Book
//! |  + ChapterUID: 1234           opens a chapter
//! |   + ChapterTimeStart: 00:00:00.000000000
//! |   + ChapterTimeEnd: 00:10:00.000000000
//! |    + ChapterString: Chapter 1
//! ```
//!
//! Chapter fields attach to the most recently opened chapter. A field seen
//! before any chapter was opened, a tag name without its value line and a
//! chapter missing one of its fields are rejected.

use super::{Chapter, MkvInfo, UNKNOWN};
use crate::error::{PortabookError, Result};

const AUTHOR_TAG: &str = "+ Name: ALBUM_ARTIST";
const TITLE_TAG: &str = "+ Name: ALBUM";
const TAG_VALUE_TOKEN: &str = "String:";
const CHAPTER_UID: &str = "+ ChapterUID:";
const CHAPTER_START: &str = "+ ChapterTimeStart:";
const CHAPTER_END: &str = "+ ChapterTimeEnd:";
const CHAPTER_NAME: &str = "+ ChapterString:";
const CHAPTER_NAME_TOKEN: &str = "ChapterString:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Author,
    Title,
}

impl Tag {
    fn marker(self) -> &'static str {
        match self {
            Tag::Author => AUTHOR_TAG,
            Tag::Title => TITLE_TAG,
        }
    }
}

#[derive(Debug, Default)]
struct ChapterDraft {
    uid: String,
    start: Option<String>,
    end: Option<String>,
    name: Option<String>,
    opened_at: usize,
}

impl ChapterDraft {
    fn finish(self) -> Result<Chapter> {
        let missing = |field: &str| {
            PortabookError::Parse(format!(
                "chapter {} (line {}) has no {}",
                self.uid, self.opened_at, field
            ))
        };

        Ok(Chapter {
            start: self.start.clone().ok_or_else(|| missing("ChapterTimeStart"))?,
            end: self.end.clone().ok_or_else(|| missing("ChapterTimeEnd"))?,
            name: self.name.clone().ok_or_else(|| missing("ChapterString"))?,
            uid: self.uid.clone(),
        })
    }
}

#[derive(Debug)]
enum State {
    AwaitingChapter,
    InChapter(ChapterDraft),
}

/// Drop the framing character and surrounding whitespace
fn unframe(line: &str) -> &str {
    let mut chars = line.chars();
    chars.next();
    chars.as_str().trim()
}

fn value_after<'a>(line: &'a str, token: &str, line_number: usize) -> Result<&'a str> {
    let value = line
        .split_once(token)
        .map(|(_, value)| value.trim())
        .ok_or_else(|| {
            PortabookError::Parse(format!("line {}: expected \"{}\" in {:?}", line_number, token, line))
        })?;

    if value.is_empty() {
        return Err(PortabookError::Parse(format!(
            "line {}: empty value in {:?}",
            line_number, line
        )));
    }
    Ok(value)
}

/// Parse a full diagnostic report into author, title and ordered chapters.
///
/// Author and title default to `"Unknown"` when their tags are absent.
pub fn parse_mkv_info(report: &str) -> Result<MkvInfo> {
    let mut author = None;
    let mut title = None;
    let mut chapters = Vec::new();
    let mut state = State::AwaitingChapter;
    let mut pending_tag: Option<(Tag, usize)> = None;

    for (index, raw_line) in report.split('\n').enumerate() {
        let line_number = index + 1;
        let line = unframe(raw_line);

        if let Some((tag, _)) = pending_tag.take() {
            let value = value_after(line, TAG_VALUE_TOKEN, line_number)?.to_string();
            match tag {
                Tag::Author => author = Some(value),
                Tag::Title => title = Some(value),
            }
            continue;
        }

        if line == AUTHOR_TAG {
            pending_tag = Some((Tag::Author, line_number));
        } else if line == TITLE_TAG {
            pending_tag = Some((Tag::Title, line_number));
        } else if line.starts_with(CHAPTER_UID) {
            let uid = value_after(line, ":", line_number)?.to_string();
            let opened = ChapterDraft {
                uid,
                opened_at: line_number,
                ..Default::default()
            };
            if let State::InChapter(previous) = std::mem::replace(&mut state, State::InChapter(opened)) {
                chapters.push(previous.finish()?);
            }
        } else if line.starts_with(CHAPTER_START)
            || line.starts_with(CHAPTER_END)
            || line.starts_with(CHAPTER_NAME)
        {
            let State::InChapter(draft) = &mut state else {
                return Err(PortabookError::Parse(format!(
                    "line {}: {:?} appears before any {}",
                    line_number, line, CHAPTER_UID
                )));
            };

            if line.starts_with(CHAPTER_START) {
                draft.start = Some(value_after(line, ":", line_number)?.to_string());
            } else if line.starts_with(CHAPTER_END) {
                draft.end = Some(value_after(line, ":", line_number)?.to_string());
            } else {
                // chapter names may contain colons themselves
                draft.name = Some(value_after(line, CHAPTER_NAME_TOKEN, line_number)?.to_string());
            }
        }
    }

    if let Some((tag, line_number)) = pending_tag {
        return Err(PortabookError::Parse(format!(
            "line {}: {:?} is not followed by a value line",
            line_number,
            tag.marker()
        )));
    }

    if let State::InChapter(last) = state {
        chapters.push(last.finish()?);
    }

    Ok(MkvInfo {
        author: author.unwrap_or_else(|| UNKNOWN.to_string()),
        title: title.unwrap_or_else(|| UNKNOWN.to_string()),
        chapters,
    })
}
