//! Ordered option table for ffmpeg-style backends.
//!
//! Options gathered from several sources (renderer declarations, request
//! headers) are kept in insertion order and classified by where on the
//! command line they belong. Transferring an option into an argument list
//! removes it from the table, so each option is emitted exactly once no
//! matter how many transfer passes the command builder makes.
//!
//! Generated backend arguments are appended first; user sources merged on
//! top replace a flag's value in place, extend filter chains, and add to
//! repeatable flags.

/// Where an option must appear relative to the input locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionScope {
    /// Applies to the whole invocation; must precede everything else
    Global,
    /// Describes the input; must precede the input locator
    Input,
    /// Everything else
    Output,
}

/// Flags that affect the whole ffmpeg invocation.
const GLOBAL_FLAGS: &[&str] = &[
    "-y",
    "-n",
    "-v",
    "-loglevel",
    "-hide_banner",
    "-nostats",
    "-stats",
    "-nostdin",
    "-report",
    "-filter_threads",
    "-filter_complex_threads",
    "-hwaccel_device",
];

/// Flags that describe the input and therefore go before `-i`.
const INPUT_FLAGS: &[&str] = &[
    "-headers",
    "-user_agent",
    "-user-agent",
    "-cookies",
    "-referer",
    "-re",
    "-timeout",
    "-rw_timeout",
    "-reconnect",
    "-reconnect_streamed",
    "-reconnect_delay_max",
    "-seekable",
    "-analyzeduration",
    "-probesize",
    "-fflags",
    "-hwaccel",
    "-itsoffset",
    "-thread_queue_size",
];

/// Filter graph flags: a second value extends the chain instead of replacing it.
const FILTER_FLAGS: &[&str] = &["-vf", "-af", "-filter:v", "-filter:a"];

/// Flags ffmpeg accepts any number of times.
const REPEATABLE_FLAGS: &[&str] = &["-map", "-metadata"];

/// Header field names that must start on their own line.
const HEADER_FIELDS: &[&str] = &[
    "User-Agent",
    "Cookie",
    "Referer",
    "Accept",
    "Range",
    "Connection",
    "Content-Length",
    "Content-Type",
];

pub fn scope_of(flag: &str) -> OptionScope {
    if GLOBAL_FLAGS.contains(&flag) {
        OptionScope::Global
    } else if INPUT_FLAGS.contains(&flag) {
        OptionScope::Input
    } else {
        OptionScope::Output
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OptionEntry {
    flag: String,
    value: Option<String>,
    scope: OptionScope,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionTable {
    entries: Vec<OptionEntry>,
}

impl OptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a user-supplied option string (shell quoting honoured).
    ///
    /// A token is a flag when it starts with `-` and is not a negative number;
    /// the following non-flag token is its value. Stray tokens without a flag are
    /// kept as valueless output entries so nothing the user wrote is dropped.
    pub fn parse(options: &str) -> Self {
        let mut table = Self::new();
        table.add_all(options);
        table
    }

    /// Merge an option string into the table; later sources win on conflicts.
    pub fn add_all(&mut self, options: &str) {
        let tokens = shlex::split(options)
            .unwrap_or_else(|| options.split_whitespace().map(str::to_string).collect());
        for (flag, value) in pair_tokens(tokens) {
            if is_flag(&flag) {
                self.upsert(flag, value);
            } else {
                self.push(flag, value);
            }
        }
    }

    /// Append already-split arguments verbatim, keeping repeated flags.
    pub fn append_args(&mut self, args: impl IntoIterator<Item = String>) {
        for (flag, value) in pair_tokens(args) {
            self.push(flag, value);
        }
    }

    /// Merge every entry of `other` on top of this table, in its order.
    pub fn merge(&mut self, other: OptionTable) {
        for entry in other.entries {
            if is_flag(&entry.flag) {
                self.upsert(entry.flag, entry.value);
            } else {
                self.entries.push(entry);
            }
        }
    }

    fn push(&mut self, flag: String, value: Option<String>) {
        let scope = if is_flag(&flag) {
            scope_of(&flag)
        } else {
            OptionScope::Output
        };
        self.entries.push(OptionEntry { flag, value, scope });
    }

    /// Insert or replace a flag. Replacing keeps the original position.
    ///
    /// # Panics
    /// Panics when `flag` does not start with `-`; programmatic flags are
    /// always literal and a bare word here is a construction bug.
    pub fn insert(&mut self, flag: &str, value: Option<&str>) {
        assert!(
            flag.starts_with('-'),
            "option flag must start with '-': {flag:?}"
        );
        self.upsert(flag.to_string(), value.map(str::to_string));
    }

    fn upsert(&mut self, flag: String, value: Option<String>) {
        let value = if flag == "-headers" {
            value.map(|v| normalize_headers(&v))
        } else {
            value
        };

        if REPEATABLE_FLAGS.contains(&flag.as_str()) {
            self.push(flag, value);
            return;
        }
        let chains = FILTER_FLAGS.contains(&flag.as_str());
        match self.entries.iter_mut().find(|e| e.flag == flag) {
            Some(existing) if chains => {
                existing.value = join_filters(existing.value.take(), value);
            }
            Some(existing) => existing.value = value,
            None => self.push(flag, value),
        }
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.entries.iter().any(|e| e.flag == flag)
    }

    pub fn get(&self, flag: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.flag == flag)
            .and_then(|e| e.value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Move every entry of `scope` into `args`, preserving order.
    pub fn transfer_scope(&mut self, scope: OptionScope, args: &mut Vec<String>) {
        self.transfer_where(args, |e| e.scope == scope);
    }

    pub fn transfer_globals(&mut self, args: &mut Vec<String>) {
        self.transfer_scope(OptionScope::Global, args);
    }

    pub fn transfer_input_options(&mut self, args: &mut Vec<String>) {
        self.transfer_scope(OptionScope::Input, args);
    }

    /// Move the named flags (in table order) into `args`.
    pub fn transfer_named(&mut self, flags: &[&str], args: &mut Vec<String>) {
        self.transfer_where(args, |e| flags.contains(&e.flag.as_str()));
    }

    /// Move everything that is left.
    pub fn transfer_all(&mut self, args: &mut Vec<String>) {
        self.transfer_where(args, |_| true);
    }

    fn transfer_where(&mut self, args: &mut Vec<String>, pred: impl Fn(&OptionEntry) -> bool) {
        let (moved, kept): (Vec<_>, Vec<_>) = self.entries.drain(..).partition(|e| pred(e));
        self.entries = kept;
        for entry in moved {
            args.push(entry.flag);
            if let Some(value) = entry.value {
                args.push(value);
            }
        }
    }
}

/// Pair each flag with the non-flag token after it, if any.
fn pair_tokens(tokens: impl IntoIterator<Item = String>) -> Vec<(String, Option<String>)> {
    let mut iter = tokens.into_iter().peekable();
    let mut pairs = Vec::new();
    while let Some(token) = iter.next() {
        let value = if is_flag(&token) {
            iter.next_if(|next| !is_flag(next))
        } else {
            None
        };
        pairs.push((token, value));
    }
    pairs
}

fn join_filters(existing: Option<String>, added: Option<String>) -> Option<String> {
    match (existing, added) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Some(format!("{a},{b}")),
        (Some(a), Some(b)) => Some(if a.is_empty() { b } else { a }),
        (a, b) => b.or(a),
    }
}

fn is_flag(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-') && token.parse::<f64>().is_err()
}

/// Put each known header field on its own `\r\n`-terminated line.
///
/// Trailing whitespace of every field is trimmed and the blob always ends with
/// `\r\n`. Applying this to its own output returns the same string.
pub fn normalize_headers(raw: &str) -> String {
    let mut cuts: Vec<usize> = Vec::new();
    for field in HEADER_FIELDS {
        let pattern = format!("{field}:");
        let mut from = 0;
        while let Some(found) = raw[from..].find(&pattern) {
            let at = from + found;
            let line_start = at == 0
                || raw[..at]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_whitespace());
            if at > 0 && line_start {
                cuts.push(at);
            }
            from = at + pattern.len();
        }
    }
    cuts.sort_unstable();
    cuts.dedup();

    let mut fields = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        fields.push(&raw[start..cut]);
        start = cut;
    }
    fields.push(&raw[start..]);

    let mut out = String::with_capacity(raw.len() + 16);
    for field in fields {
        let field = field.trim_end();
        if field.is_empty() {
            continue;
        }
        out.push_str(field);
        out.push_str("\r\n");
    }
    if out.is_empty() {
        out.push_str("\r\n");
    }
    out
}
