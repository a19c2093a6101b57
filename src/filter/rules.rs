//! Compiled line-rewrite rules applied to server responses.
//!
//! Two kinds of rules exist: a fixed capability rule that strips the
//! COMPRESS=DEFLATE token from CAPABILITY announcements (the proxy cannot
//! filter a compressed stream), and one omit rule per configured pattern
//! that deletes entire LIST/LSUB lines naming a matching mailbox.
//!
//! All rules are multi-line regexes over raw wire bytes, so one chunk
//! holding several complete lines is rewritten in a single pass. The caller
//! guarantees chunks end on a CRLF boundary; the `(?m)^` anchors then only
//! ever match at true line starts.

use std::borrow::Cow;

use regex::bytes::Regex;

use crate::error::{Error, Result};

/// Capability-announcement rewrite. `$1` is everything up to the token,
/// `$2` is the rest of the line including the CRLF.
const CAPABILITY_PATTERN: &str =
    r"(?m)^([A-Za-z0-9*.]+ OK \[CAPABILITY IMAP4[^\r\n]+) COMPRESS=DEFLATE([^\r\n]*\r\n)";

/// Immutable set of compiled response rewrite rules.
///
/// Built once at startup and shared across connections. `apply` is a pure
/// function of its input chunk.
#[derive(Debug)]
pub struct FilterRuleSet {
    capability: Regex,
    omits: Vec<Regex>,
}

impl FilterRuleSet {
    /// Compile the capability rule plus one omit rule per pattern.
    ///
    /// Each pattern is a regex fragment; a LIST or LSUB response line is
    /// omitted when its quoted mailbox name contains a match anywhere, so
    /// `archive` also hides `INBOX.archive.2020`. An invalid fragment fails
    /// the whole compilation.
    pub fn compile(omit_patterns: &[String]) -> Result<Self> {
        let capability = Regex::new(CAPABILITY_PATTERN)
            .map_err(|e| Error::pattern(format!("capability rule: {}", e)))?;

        let omits = omit_patterns
            .iter()
            .map(|pat| {
                Regex::new(&format!(
                    "(?m)^\\* (LIST|LSUB) (\\([^)]*\\))? \"[^\"]\" \"?[^\"\r\n]*{}[^\r\n]*\"?\r\n",
                    pat
                ))
                .map_err(|e| Error::pattern(format!("invalid omit pattern '{}': {}", pat, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { capability, omits })
    }

    /// Rewrite a chunk of complete response lines.
    ///
    /// Applies the capability rule first, then every omit rule in configured
    /// order. Returns the input unchanged (and unallocated) when no rule
    /// matches, which is the overwhelmingly common case.
    pub fn apply<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        let mut out = Cow::Borrowed(chunk);

        if self.capability.is_match(&out) {
            let rewritten = self.capability.replace_all(&out, &b"$1$2"[..]).into_owned();
            out = Cow::Owned(rewritten);
        }

        for re in &self.omits {
            if re.is_match(&out) {
                let rewritten = re.replace_all(&out, &b""[..]).into_owned();
                out = Cow::Owned(rewritten);
            }
        }

        out
    }

    /// Number of configured omit rules (the capability rule is always on).
    pub fn omit_count(&self) -> usize {
        self.omits.len()
    }
}
