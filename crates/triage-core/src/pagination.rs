use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::TriageError;

pub const MIN_LIMIT: u32 = 1;
pub const MAX_LIMIT: u32 = 100;
pub const DEFAULT_LIMIT: u32 = 20;

/// Opaque `(timestamp, id)` keyset cursor. Encoded as `<iso-timestamp>_<row-id>`;
/// comparison is lexicographic on the pair, descending, which is what makes the
/// cursor stable under concurrent inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn encode(&self) -> String {
        format!("{}_{}", self.timestamp.to_rfc3339(), self.id)
    }

    pub fn decode(raw: &str) -> Result<Self, TriageError> {
        let (ts, id) = raw
            .rsplit_once('_')
            .ok_or_else(|| TriageError::Validation("malformed cursor".to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| TriageError::Validation("malformed cursor timestamp".to_string()))?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id)
            .map_err(|_| TriageError::Validation("malformed cursor id".to_string()))?;
        Ok(Self { timestamp, id })
    }
}

/// Clamp a caller-supplied page size to `[MIN_LIMIT, MAX_LIMIT]`.
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(MIN_LIMIT, MAX_LIMIT)
}

/// Envelope returned to callers of a keyset-paginated read.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Apply the "fetch limit+1, drop the extra" trick to a row set that is already
/// sorted by `(timestamp, id)` descending, given an accessor for each row's key.
pub fn paginate<T>(mut rows: Vec<T>, limit: u32, key_of: impl Fn(&T) -> (DateTime<Utc>, Uuid)) -> Page<T> {
    let has_more = rows.len() as u32 > limit;
    if has_more {
        rows.truncate(limit as usize);
    }

    let next_cursor = if has_more {
        rows.last().map(|row| {
            let (timestamp, id) = key_of(row);
            Cursor { timestamp, id }.encode()
        })
    } else {
        None
    };

    Page {
        items: rows,
        next_cursor,
        has_more,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone)]
    struct Row {
        id: Uuid,
        ts: DateTime<Utc>,
    }

    fn rows(n: usize) -> Vec<Row> {
        let base = Utc::now();
        (0..n)
            .map(|i| Row {
                id: Uuid::new_v4(),
                ts: base - Duration::seconds(i as i64),
            })
            .collect()
    }

    #[test]
    fn cursor_round_trips() {
        let cursor = Cursor {
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
        };
        let encoded = cursor.encode();
        let decoded = Cursor::decode(&encoded).unwrap();
        assert_eq!(decoded.id, cursor.id);
    }

    #[test]
    fn clamp_limit_respects_bounds() {
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(0)), MIN_LIMIT);
        assert_eq!(clamp_limit(Some(1000)), MAX_LIMIT);
        assert_eq!(clamp_limit(Some(50)), 50);
    }

    #[test]
    fn paginate_drops_extra_row_and_sets_cursor() {
        let page = paginate(rows(6), 5, |row| (row.ts, row.id));
        assert_eq!(page.items.len(), 5);
        assert!(page.has_more);
        assert!(page.next_cursor.is_some());
    }

    #[test]
    fn paginate_final_page_has_no_cursor() {
        let page = paginate(rows(3), 5, |row| (row.ts, row.id));
        assert_eq!(page.items.len(), 3);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }
}
