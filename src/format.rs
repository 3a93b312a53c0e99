//! Column-aligned rendering of a worktree snapshot

use unicode_width::UnicodeWidthStr;

use crate::model::Worktree;

/// Spaces between aligned columns
const COLUMN_PADDING: usize = 4;

/// Replace the user's home directory inside displayed paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeAbbreviation {
    pub home: String,
    pub replacement: String,
}

impl HomeAbbreviation {
    pub fn new(home: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            replacement: replacement.into(),
        }
    }

    /// Every occurrence of `home` is replaced, not only a leading one
    pub fn apply(&self, path: &str) -> String {
        if self.home.is_empty() {
            return path.to_string();
        }
        path.replace(&self.home, &self.replacement)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Prefix each line with `<n>: `, the record's position in the snapshot
    pub with_index: bool,
    pub home: Option<HomeAbbreviation>,
}

/// Render the snapshot as one aligned line per worktree, in snapshot order
pub fn format_list(worktrees: &[Worktree], options: &ListOptions) -> String {
    table(worktrees, options).render()
}

/// One line per worktree, for feeding a picker: line `i` is record `i`
pub fn format_lines(worktrees: &[Worktree], options: &ListOptions) -> Vec<String> {
    table(worktrees, options).render_lines()
}

fn table(worktrees: &[Worktree], options: &ListOptions) -> Table {
    let mut table = Table::new(COLUMN_PADDING);
    for (i, wt) in worktrees.iter().enumerate() {
        table.push_row(row(i, wt, options));
    }
    table
}

/// Control characters are shown escaped (`\n`, `\t`, `\u{1b}`) so a cell
/// never spans lines or moves the cursor.
fn escape_control(text: &str) -> String {
    if !text.chars().any(char::is_control) {
        return text.to_string();
    }
    text.chars()
        .map(|c| {
            if c.is_control() {
                c.escape_default().to_string()
            } else {
                c.to_string()
            }
        })
        .collect()
}

fn row(index: usize, wt: &Worktree, options: &ListOptions) -> Vec<String> {
    let raw_path = wt.path.to_string_lossy();
    let path = escape_control(&match &options.home {
        Some(home) => home.apply(&raw_path),
        None => raw_path.to_string(),
    });

    let location = if options.with_index {
        format!("{index}: 📁 {path}")
    } else {
        format!("📁 {path}")
    };

    let (status, branch) = if wt.is_bare {
        ("🗳️ (bare)".to_string(), String::new())
    } else if wt.is_detached {
        ("🔎 (detached)".to_string(), String::new())
    } else {
        (
            format!("🔗 {}", wt.short_head()),
            format!("🔀 {}", escape_control(wt.branch_name().unwrap_or_default())),
        )
    };

    let lock = match (wt.is_locked, wt.lock_reason.is_empty()) {
        (false, _) => String::new(),
        (true, true) => "🔒".to_string(),
        (true, false) => format!("🔒 {}", escape_control(&wt.lock_reason)),
    };

    vec![location, status, branch, lock]
}

/// Aligns cells into columns whose widths are computed over every row at once
#[derive(Debug, Default)]
pub struct Table {
    padding: usize,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(padding: usize) -> Self {
        Self {
            padding,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    fn column_widths(&self) -> Vec<usize> {
        let columns = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut widths = vec![0; columns];
        for row in &self.rows {
            for (j, cell) in row.iter().enumerate() {
                widths[j] = widths[j].max(cell.width());
            }
        }
        widths
    }

    /// All rows, each line ending with `\n`
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in self.render_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// One string per row. Columns that are empty on every row take no
    /// space at all and trailing whitespace is trimmed.
    pub fn render_lines(&self) -> Vec<String> {
        let widths = self.column_widths();

        self.rows
            .iter()
            .map(|row| {
                let mut line = String::new();
                for (j, cell) in row.iter().enumerate() {
                    if widths[j] == 0 {
                        continue;
                    }
                    line.push_str(cell);
                    let fill = widths[j] - cell.width() + self.padding;
                    line.extend(std::iter::repeat(' ').take(fill));
                }
                line.truncate(line.trim_end().len());
                line
            })
            .collect()
    }
}
