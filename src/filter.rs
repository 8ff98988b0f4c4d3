use crate::record::{Level, LogRecord};

/// Level and category filter applied to records before they are buffered.
///
/// Category patterns match either exactly or by prefix when they end in
/// `*` (`db*` matches `db`, `db.query`, `dbx`).
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Accepted levels. Empty accepts everything.
    pub levels: Vec<Level>,
    /// Accepted categories. Empty accepts everything.
    pub categories: Vec<String>,
    /// Categories removed after `categories` matched.
    pub except: Vec<String>,
}

impl MessageFilter {
    pub fn new(levels: Vec<Level>, categories: Vec<String>, except: Vec<String>) -> Self {
        Self { levels, categories, except }
    }

    pub fn accepts(&self, record: &LogRecord) -> bool {
        if !self.levels.is_empty() && !self.levels.contains(&record.level) {
            return false;
        }

        let category = record.category.as_str();
        let matched = self.categories.is_empty()
            || self.categories.iter().any(|pattern| {
                pattern == category
                    || (pattern.ends_with('*') && category.starts_with(pattern.trim_end_matches('*')))
            });
        if !matched {
            return false;
        }

        !self.except.iter().any(|pattern| {
            let prefix = pattern.trim_end_matches('*');
            pattern == category || (prefix != pattern && category.starts_with(prefix))
        })
    }

    /// Keep the records this filter accepts, preserving order.
    pub fn apply(&self, records: Vec<LogRecord>) -> Vec<LogRecord> {
        records.into_iter().filter(|r| self.accepts(r)).collect()
    }
}
