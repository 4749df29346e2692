//! Animation sequences inferred from numbered frame names
//! (`walk_1.png`, `walk_2.png`, ...).

use crate::model::OrderedMap;
use crate::natural::natural_cmp;

const SEPARATORS: [char; 3] = ['/', '_', '-'];

/// A frame id split around its trailing number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceName<'a> {
    /// Everything before the number, separator included.
    pub prefix: &'a str,
    /// Trailing digits before the extension; may be empty.
    pub digits: &'a str,
    /// Extension with its dot, or empty.
    pub extension: &'a str,
}

impl<'a> SequenceName<'a> {
    pub fn parse(id: &'a str) -> Self {
        let segment_start = id.rfind('/').map_or(0, |i| i + 1);
        let stem_end = match id[segment_start..].rfind('.') {
            Some(dot) if dot > 0 => segment_start + dot,
            _ => id.len(),
        };
        let stem = &id[..stem_end];
        let digits_len = stem.bytes().rev().take_while(u8::is_ascii_digit).count();
        let split = stem.len() - digits_len;
        Self {
            prefix: &stem[..split],
            digits: &stem[split..],
            extension: &id[stem_end..],
        }
    }

    /// Sequence name: the prefix without one trailing separator.
    pub fn name(&self) -> &'a str {
        self.prefix
            .strip_suffix(SEPARATORS)
            .unwrap_or(self.prefix)
    }

    /// Id of the frame that follows this one, keeping the digit width.
    pub fn successor(&self) -> Option<String> {
        if self.digits.is_empty() {
            return None;
        }
        let next = self.digits.parse::<u64>().ok()?.checked_add(1)?;
        let width = self.digits.len();
        Some(format!("{}{next:0width$}{}", self.prefix, self.extension))
    }
}

/// Infers animation sequences over `ids`.
///
/// Ids are visited in natural order; an id links to the next one when that
/// one is its numeric successor with the same prefix and extension. A later
/// run under an already used name is appended to that sequence.
pub fn infer_animations<S: AsRef<str>>(ids: &[S]) -> OrderedMap<Vec<String>> {
    let mut sorted: Vec<&str> = ids.iter().map(|s| s.as_ref()).collect();
    sorted.sort_by(|a, b| natural_cmp(a, b));

    let mut out: OrderedMap<Vec<String>> = OrderedMap::default();
    for pair in sorted.windows(2) {
        let (cur, next) = (pair[0], pair[1]);
        let parsed = SequenceName::parse(cur);
        let name = parsed.name();
        if name.is_empty() || parsed.successor().as_deref() != Some(next) {
            continue;
        }
        match out.0.iter_mut().find(|(k, _)| k == name) {
            Some((_, frames)) => {
                if frames.last().map(String::as_str) != Some(cur) {
                    frames.push(cur.to_string());
                }
                frames.push(next.to_string());
            }
            None => out
                .0
                .push((name.to_string(), vec![cur.to_string(), next.to_string()])),
        }
    }
    out.0.sort_by(|a, b| natural_cmp(&a.0, &b.0));
    out
}
