//! Filename charset detection for legacy zip entries.
//!
//! Zip entries without the language-encoding flag carry no charset tag, and
//! archives created on CJK systems store names in the local code page. The
//! detector only ever answers with one of [`CJK_CHARSETS`], and fails rather
//! than guesses when the input does not look like any of them.
//!
//! Order matters: GB18030 accepts most byte sequences that are valid
//! Shift_JIS, so Shift_JIS is tried first or it would never win.

use std::borrow::Cow;

use encoding_rs::{
    Encoding, BIG5_INIT, EUC_JP_INIT, EUC_KR_INIT, GB18030_INIT, SHIFT_JIS_INIT, UTF_8,
    UTF_8_INIT,
};

/// Supported filename charsets, highest priority first.
pub static CJK_CHARSETS: [&Encoding; 6] = [
    &UTF_8_INIT,
    &SHIFT_JIS_INIT,
    &GB18030_INIT,
    &EUC_KR_INIT,
    &EUC_JP_INIT,
    &BIG5_INIT,
];

fn priority(encoding: &Encoding) -> Option<usize> {
    CJK_CHARSETS.iter().position(|e| *e == encoding)
}

/// Why no single charset could be chosen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectError {
    #[error("filenames are not in any supported CJK charset")]
    NotCjk,

    #[error("filename charset is ambiguous between {}", .0.join(", "))]
    Ambiguous(Vec<&'static str>),
}

/// Produces candidate charsets for one raw filename.
///
/// Anything outside [`CJK_CHARSETS`] is discarded by the detector, so an
/// implementation may return whatever its model considers likely.
pub trait CharsetProber {
    fn probe(&self, raw: &[u8]) -> Vec<&'static Encoding>;
}

/// Default prober: a charset is a candidate when the bytes decode under it
/// without malformed sequences and the text contains nothing a filename
/// would never contain.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecodeProber;

impl CharsetProber for DecodeProber {
    fn probe(&self, raw: &[u8]) -> Vec<&'static Encoding> {
        CJK_CHARSETS
            .iter()
            .copied()
            .filter(|&encoding| {
                decode_strict(encoding, raw).is_some_and(|text| !has_impossible_chars(&text))
            })
            .collect()
    }
}

/// Decode without replacement characters; `None` on any malformed sequence.
pub fn decode_strict(encoding: &'static Encoding, raw: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(raw)
        .map(Cow::into_owned)
}

/// Resolve a user-supplied charset label (`sjis`, `gbk`, `cp949`, ...).
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

fn has_impossible_chars(text: &str) -> bool {
    text.chars().any(|c| {
        c.is_control() || c == '\u{FFFD}' || ('\u{E000}'..='\u{F8FF}').contains(&c)
    })
}

fn is_halfwidth_katakana(c: char) -> bool {
    ('\u{FF61}'..='\u{FF9F}').contains(&c)
}

/// Default validity check applied when several charsets remain.
///
/// Besides the prober's checks, rejects text made up mostly of halfwidth
/// katakana: that is what GBK or Big5 bytes look like when read as Shift_JIS.
pub fn is_plausible_name(text: &str) -> bool {
    if has_impossible_chars(text) {
        return false;
    }
    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();
    let halfwidth = text.chars().filter(|c| is_halfwidth_katakana(*c)).count();
    non_ascii == 0 || halfwidth * 2 <= non_ascii
}

/// Picks the single most probable charset for a set of raw filenames.
pub struct CharsetDetector<P = DecodeProber> {
    prober: P,
    validator: fn(&str) -> bool,
}

impl Default for CharsetDetector<DecodeProber> {
    fn default() -> Self {
        Self::new()
    }
}

impl CharsetDetector<DecodeProber> {
    pub fn new() -> Self {
        Self::with_prober(DecodeProber)
    }
}

impl<P: CharsetProber> CharsetDetector<P> {
    pub fn with_prober(prober: P) -> Self {
        Self {
            prober,
            validator: is_plausible_name,
        }
    }

    /// Replace the validity check used to narrow down multiple candidates.
    pub fn with_validator(mut self, validator: fn(&str) -> bool) -> Self {
        self.validator = validator;
        self
    }

    /// Detect the charset shared by all `names`.
    ///
    /// Pure-ASCII names carry no information and are skipped; if nothing else
    /// is left the answer is UTF-8. With several plausible charsets left,
    /// `strict` reports the ambiguity instead of taking the highest priority.
    pub fn detect<'a, I>(&self, names: I, strict: bool) -> Result<&'static Encoding, DetectError>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let examined: Vec<&[u8]> = names.into_iter().filter(|raw| !raw.is_ascii()).collect();
        if examined.is_empty() {
            return Ok(UTF_8);
        }

        let mut candidates: Option<Vec<&'static Encoding>> = None;
        for raw in &examined {
            let found: Vec<&'static Encoding> = self
                .prober
                .probe(raw)
                .into_iter()
                .filter(|encoding| priority(encoding).is_some())
                .collect();
            if found.is_empty() {
                return Err(DetectError::NotCjk);
            }

            let next: Vec<&'static Encoding> = match candidates.take() {
                None => found,
                Some(previous) => previous
                    .into_iter()
                    .filter(|encoding| found.contains(encoding))
                    .collect(),
            };
            if next.is_empty() {
                return Err(DetectError::NotCjk);
            }
            candidates = Some(next);
        }

        let mut candidates = candidates.unwrap_or_default();
        candidates.sort_by_key(|encoding| priority(encoding));
        candidates.dedup();

        if let [only] = candidates.as_slice() {
            return Ok(*only);
        }

        let survivors: Vec<&'static Encoding> = candidates
            .into_iter()
            .filter(|&encoding| {
                examined.iter().all(|raw| {
                    decode_strict(encoding, raw).is_some_and(|text| (self.validator)(&text))
                })
            })
            .collect();

        match survivors.as_slice() {
            [] => Err(DetectError::NotCjk),
            [only] => Ok(*only),
            [best, ..] if !strict => {
                tracing::debug!(
                    "Filename charset ambiguous, guessing {} over {} other(s)",
                    best.name(),
                    survivors.len() - 1
                );
                Ok(*best)
            }
            _ => Err(DetectError::Ambiguous(
                survivors.iter().map(|e| e.name()).collect(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{GB18030, SHIFT_JIS, WINDOWS_1252};

    /// Reports a fixed candidate set for every filename.
    struct FixedProber(Vec<&'static Encoding>);

    impl CharsetProber for FixedProber {
        fn probe(&self, _raw: &[u8]) -> Vec<&'static Encoding> {
            self.0.clone()
        }
    }

    fn encode(encoding: &'static Encoding, text: &str) -> Vec<u8> {
        let (bytes, _, had_errors) = encoding.encode(text);
        assert!(!had_errors);
        bytes.into_owned()
    }

    // "テスト" in Shift_JIS; also a valid pair of GBK ideographs
    const SJIS_TEST: &[u8] = &[0x83, 0x65, 0x83, 0x58, 0x83, 0x67];

    #[test]
    fn test_ascii_only_is_utf8() {
        let detector = CharsetDetector::new();
        let names: [&[u8]; 2] = [b"readme.txt", b"src/main.rs"];
        assert_eq!(detector.detect(names, false), Ok(UTF_8));
        assert_eq!(detector.detect(names, true), Ok(UTF_8));
        assert_eq!(detector.detect(std::iter::empty(), true), Ok(UTF_8));
    }

    #[test]
    fn test_priority_wins_when_not_strict() {
        let detector = CharsetDetector::with_prober(FixedProber(vec![GB18030, SHIFT_JIS]));
        assert_eq!(detector.detect([SJIS_TEST], false), Ok(SHIFT_JIS));
    }

    #[test]
    fn test_strict_reports_ambiguity() {
        let detector = CharsetDetector::with_prober(FixedProber(vec![SHIFT_JIS, GB18030]));
        assert_eq!(
            detector.detect([SJIS_TEST], true),
            Err(DetectError::Ambiguous(vec!["Shift_JIS", "gb18030"]))
        );
    }

    #[test]
    fn test_validator_narrows_to_one() {
        let detector = CharsetDetector::with_prober(FixedProber(vec![SHIFT_JIS, GB18030]))
            .with_validator(|text| text.contains('テ'));
        assert_eq!(detector.detect([SJIS_TEST], true), Ok(SHIFT_JIS));
    }

    #[test]
    fn test_non_cjk_candidates_are_dropped() {
        let detector = CharsetDetector::with_prober(FixedProber(vec![WINDOWS_1252]));
        assert_eq!(detector.detect([SJIS_TEST], false), Err(DetectError::NotCjk));
    }

    #[test]
    fn test_empty_intersection_is_not_cjk() {
        struct Alternating;
        impl CharsetProber for Alternating {
            fn probe(&self, raw: &[u8]) -> Vec<&'static Encoding> {
                if raw[0] == 0x83 {
                    vec![SHIFT_JIS]
                } else {
                    vec![GB18030]
                }
            }
        }
        let detector = CharsetDetector::with_prober(Alternating);
        let gbk = encode(GB18030, "中文");
        assert_eq!(
            detector.detect([SJIS_TEST, gbk.as_slice()], false),
            Err(DetectError::NotCjk)
        );
    }

    #[test]
    fn test_garbage_is_not_cjk() {
        let detector = CharsetDetector::new();
        let names: [&[u8]; 1] = [&[0xff, 0xfe, 0xff]];
        assert_eq!(detector.detect(names, false), Err(DetectError::NotCjk));
    }

    #[test]
    fn test_utf8_without_flag() {
        let detector = CharsetDetector::new();
        let name = "日本語のファイル.txt".as_bytes();
        assert_eq!(detector.detect([name, b"plain.txt".as_slice()], false), Ok(UTF_8));
    }

    #[test]
    fn test_shift_jis_names() {
        let detector = CharsetDetector::new();
        let a = encode(SHIFT_JIS, "テスト.txt");
        let b = encode(SHIFT_JIS, "資料/説明書.pdf");
        assert_eq!(
            detector.detect([a.as_slice(), b.as_slice()], false),
            Ok(SHIFT_JIS)
        );
    }

    #[test]
    fn test_gbk_names_skip_halfwidth_reading() {
        let detector = CharsetDetector::new();
        let name = encode(GB18030, "中文.txt");
        assert_eq!(detector.detect([name.as_slice()], false), Ok(GB18030));
    }

    #[test]
    fn test_plausible_name() {
        assert!(is_plausible_name("テスト.txt"));
        assert!(is_plausible_name("plain"));
        assert!(!is_plausible_name("ﾖﾐﾎﾄ.txt"));
        assert!(!is_plausible_name("a\u{0080}b"));
        assert!(!is_plausible_name("\u{E000}"));
    }

    #[test]
    fn test_encoding_for_label() {
        assert_eq!(encoding_for_label("sjis"), Some(SHIFT_JIS));
        assert_eq!(encoding_for_label(" GBK "), Some(encoding_rs::GBK));
        assert_eq!(encoding_for_label("cp437"), None);
    }
}
