//! Deterministic textual key derivation for memoized function calls.
//!
//! Rust has no runtime reflection on a function's module, name or formal
//! parameter list, so the pieces the original derived from `inspect` are
//! supplied explicitly by the caller (normally the `#[cached]`-style macro
//! or builder in the `shardcache` façade crate): `module`, `func`, and the
//! positional/keyword arguments already rendered to their stable textual
//! form.

use std::fmt::Write as _;

/// One positional argument, pre-rendered to its stable textual form.
pub type PosArg = str;

/// One keyword argument, pre-rendered to its stable textual form.
#[derive(Debug, Clone)]
pub struct KwArg {
    /// Argument name.
    pub name: String,
    /// Argument value, already stringified.
    pub value: String,
}

impl KwArg {
    /// Builds a keyword argument pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        KwArg {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Builds the space-separated cache key for a memoized call:
/// `[prefix?, module, func, pos_args*, "name=value" for each kwarg sorted by name]`.
///
/// Keyword arguments are sorted lexicographically by name so call-site
/// ordering is irrelevant: `derive_key(p, m, f, args, kw)` equals
/// `derive_key(p, m, f, args, kw_reordered)` for any permutation of `kw`.
pub fn derive_key(
    prefix: Option<&str>,
    module: &str,
    func: &str,
    pos_args: &[&PosArg],
    kwargs: &[KwArg],
) -> String {
    let mut sorted_kwargs: Vec<&KwArg> = kwargs.iter().collect();
    sorted_kwargs.sort_by(|a, b| a.name.cmp(&b.name));

    let mut parts: Vec<String> = Vec::with_capacity(2 + pos_args.len() + kwargs.len() + 1);
    if let Some(prefix) = prefix {
        parts.push(prefix.to_owned());
    }
    parts.push(module.to_owned());
    parts.push(func.to_owned());
    parts.extend(pos_args.iter().map(|a| (*a).to_owned()));
    for kwarg in sorted_kwargs {
        let mut rendered = String::with_capacity(kwarg.name.len() + kwarg.value.len() + 1);
        let _ = write!(rendered, "{}={}", kwarg.name, kwarg.value);
        parts.push(rendered);
    }
    parts.join(" ")
}

/// Drops a leading `self`/`cls` receiver from `pos_args` when the decorator
/// site opted out of including it (`include_self == false`).
///
/// In a Rust port there is no parameter-name introspection, so the caller
/// (the `cache()` decorator builder) is the one deciding whether the first
/// positional argument is a receiver at all; this helper just encodes the
/// drop-or-keep decision once both facts are known.
pub fn strip_receiver<'a>(pos_args: &'a [&'a PosArg], has_receiver: bool, include_self: bool) -> &'a [&'a PosArg] {
    if has_receiver && !include_self {
        &pos_args[1..]
    } else {
        pos_args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kwargs_are_sorted_regardless_of_call_order() {
        let a = derive_key(
            None,
            "mymod",
            "myfunc",
            &[],
            &[KwArg::new("b", "2"), KwArg::new("a", "1")],
        );
        let b = derive_key(
            None,
            "mymod",
            "myfunc",
            &[],
            &[KwArg::new("a", "1"), KwArg::new("b", "2")],
        );
        assert_eq!(a, b);
        assert_eq!(a, "mymod myfunc a=1 b=2");
    }

    #[test]
    fn prefix_is_prepended_when_present() {
        let key = derive_key(Some("pfx"), "m", "f", &["x"], &[]);
        assert_eq!(key, "pfx m f x");
    }

    #[test]
    fn no_prefix_omits_the_leading_token() {
        let key = derive_key(None, "m", "f", &["x"], &[]);
        assert_eq!(key, "m f x");
    }

    #[test]
    fn strip_receiver_drops_only_when_requested() {
        let args: [&str; 3] = ["self_repr", "a", "b"];
        assert_eq!(strip_receiver(&args, true, false), &["a", "b"]);
        assert_eq!(strip_receiver(&args, true, true), &args);
        assert_eq!(strip_receiver(&args, false, false), &args);
    }
}
