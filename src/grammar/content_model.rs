//! Content-particle grammar for DTD element declarations.
//!
//! A content model like `(title?, (para | sect1)+)` is parsed into a
//! [`Particle`] tree; [`Particle::matches`] checks an element's child
//! sequence against it with backtracking over candidate end positions.

use crate::error::{Error, Result};

/// Occurrence indicator on a particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurs {
    One,
    /// `?`
    Opt,
    /// `+`
    Plus,
    /// `*`
    Star,
}

impl Occurs {
    fn suffix(self) -> &'static str {
        match self {
            Occurs::One => "",
            Occurs::Opt => "?",
            Occurs::Plus => "+",
            Occurs::Star => "*",
        }
    }
}

/// One node of a parsed content model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Particle {
    Name(String, Occurs),
    Seq(Vec<Particle>, Occurs),
    Choice(Vec<Particle>, Occurs),
}

impl Particle {
    /// Whether a sequence of child element names satisfies this particle.
    pub fn matches(&self, names: &[String]) -> bool {
        self.match_ends(names, 0).contains(&names.len())
    }

    /// All positions the particle can consume up to, starting at `start`.
    fn match_ends(&self, names: &[String], start: usize) -> Vec<usize> {
        let occurs = self.occurs();
        let mut ends = match occurs {
            Occurs::One | Occurs::Plus => self.match_once(names, start),
            Occurs::Opt | Occurs::Star => {
                let mut e = self.match_once(names, start);
                e.push(start);
                e
            }
        };

        if matches!(occurs, Occurs::Plus | Occurs::Star) {
            // Extend repetitions to a fixpoint.
            let mut frontier = ends.clone();
            while !frontier.is_empty() {
                let mut next = Vec::new();
                for &pos in &frontier {
                    for end in self.match_once(names, pos) {
                        if end > pos && !ends.contains(&end) {
                            ends.push(end);
                            next.push(end);
                        }
                    }
                }
                frontier = next;
            }
        }

        ends.sort_unstable();
        ends.dedup();
        ends
    }

    /// Match exactly one repetition, ignoring the occurrence indicator.
    fn match_once(&self, names: &[String], start: usize) -> Vec<usize> {
        match self {
            Particle::Name(name, _) => {
                if names.get(start).is_some_and(|n| n == name) {
                    vec![start + 1]
                } else {
                    Vec::new()
                }
            }
            Particle::Seq(parts, _) => {
                let mut positions = vec![start];
                for part in parts {
                    let mut next = Vec::new();
                    for &pos in &positions {
                        next.extend(part.match_ends(names, pos));
                    }
                    next.sort_unstable();
                    next.dedup();
                    if next.is_empty() {
                        return Vec::new();
                    }
                    positions = next;
                }
                positions
            }
            Particle::Choice(parts, _) => {
                let mut ends = Vec::new();
                for part in parts {
                    ends.extend(part.match_ends(names, start));
                }
                ends.sort_unstable();
                ends.dedup();
                ends
            }
        }
    }

    fn occurs(&self) -> Occurs {
        match self {
            Particle::Name(_, o) | Particle::Seq(_, o) | Particle::Choice(_, o) => *o,
        }
    }
}

impl std::fmt::Display for Particle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Particle::Name(name, o) => write!(f, "{}{}", name, o.suffix()),
            Particle::Seq(parts, o) => {
                let inner: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({}){}", inner.join(" , "), o.suffix())
            }
            Particle::Choice(parts, o) => {
                let inner: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({}){}", inner.join(" | "), o.suffix())
            }
        }
    }
}

/// Parse the text of a children content model, e.g. `(title?, para+)`.
pub fn parse_particle(text: &str) -> Result<Particle> {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    let particle = parse_inner(&chars, &mut pos)?;
    skip_ws(&chars, &mut pos);
    if pos != chars.len() {
        return Err(Error::InvalidGrammar(format!(
            "trailing characters in content model: {}",
            text
        )));
    }
    Ok(particle)
}

fn parse_inner(chars: &[char], pos: &mut usize) -> Result<Particle> {
    skip_ws(chars, pos);
    if chars.get(*pos) == Some(&'(') {
        *pos += 1;
        let mut parts = vec![parse_inner(chars, pos)?];
        let mut separator: Option<char> = None;
        loop {
            skip_ws(chars, pos);
            match chars.get(*pos) {
                Some(&')') => {
                    *pos += 1;
                    break;
                }
                Some(&sep @ (',' | '|')) => {
                    if let Some(prev) = separator
                        && prev != sep
                    {
                        return Err(Error::InvalidGrammar(
                            "mixed ',' and '|' in one content-model group".to_string(),
                        ));
                    }
                    separator = Some(sep);
                    *pos += 1;
                    parts.push(parse_inner(chars, pos)?);
                }
                other => {
                    return Err(Error::InvalidGrammar(format!(
                        "unexpected {:?} in content model",
                        other
                    )));
                }
            }
        }
        let occurs = parse_occurs(chars, pos);
        Ok(match separator {
            Some('|') => Particle::Choice(parts, occurs),
            _ if parts.len() == 1 => {
                // A single-child group folds into its child, keeping the
                // outer occurrence if the inner one is plain.
                apply_group_occurs(parts.remove(0), occurs)
            }
            _ => Particle::Seq(parts, occurs),
        })
    } else {
        let start = *pos;
        while chars
            .get(*pos)
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'))
        {
            *pos += 1;
        }
        if *pos == start {
            return Err(Error::InvalidGrammar(format!(
                "expected name in content model at offset {}",
                start
            )));
        }
        let name: String = chars[start..*pos].iter().collect();
        let occurs = parse_occurs(chars, pos);
        Ok(Particle::Name(name, occurs))
    }
}

fn apply_group_occurs(inner: Particle, outer: Occurs) -> Particle {
    if outer == Occurs::One {
        return inner;
    }
    match inner {
        Particle::Name(n, Occurs::One) => Particle::Name(n, outer),
        Particle::Seq(p, Occurs::One) => Particle::Seq(p, outer),
        Particle::Choice(p, Occurs::One) => Particle::Choice(p, outer),
        other => Particle::Seq(vec![other], outer),
    }
}

fn parse_occurs(chars: &[char], pos: &mut usize) -> Occurs {
    match chars.get(*pos) {
        Some('?') => {
            *pos += 1;
            Occurs::Opt
        }
        Some('+') => {
            *pos += 1;
            Occurs::Plus
        }
        Some('*') => {
            *pos += 1;
            Occurs::Star
        }
        _ => Occurs::One,
    }
}

fn skip_ws(chars: &[char], pos: &mut usize) {
    while chars.get(*pos).is_some_and(|c| c.is_whitespace()) {
        *pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_simple_sequence() {
        let p = parse_particle("(title, para)").unwrap();
        assert!(p.matches(&names(&["title", "para"])));
        assert!(!p.matches(&names(&["para", "title"])));
        assert!(!p.matches(&names(&["title"])));
    }

    #[test]
    fn test_optional_and_star() {
        let p = parse_particle("(title?, para*)").unwrap();
        assert!(p.matches(&names(&[])));
        assert!(p.matches(&names(&["title"])));
        assert!(p.matches(&names(&["para", "para", "para"])));
        assert!(p.matches(&names(&["title", "para"])));
        assert!(!p.matches(&names(&["para", "title"])));
    }

    #[test]
    fn test_choice_plus() {
        let p = parse_particle("(title?, (para | sect1)+)").unwrap();
        assert!(p.matches(&names(&["para"])));
        assert!(p.matches(&names(&["title", "para", "sect1", "para"])));
        assert!(!p.matches(&names(&["title"])));
        assert!(!p.matches(&names(&["title", "figure"])));
    }

    #[test]
    fn test_nested_groups() {
        let p = parse_particle("((a, b) | c)*").unwrap();
        assert!(p.matches(&names(&[])));
        assert!(p.matches(&names(&["a", "b", "c", "a", "b"])));
        assert!(!p.matches(&names(&["a", "c"])));
    }

    #[test]
    fn test_display_roundtrip() {
        let p = parse_particle("(title?, (para | sect1)+)").unwrap();
        let reparsed = parse_particle(&p.to_string()).unwrap();
        assert_eq!(p, reparsed);
    }

    #[test]
    fn test_rejects_mixed_separators() {
        assert!(parse_particle("(a, b | c)").is_err());
    }

    proptest! {
        #[test]
        fn prop_star_matches_any_repetition(count in 0usize..12) {
            let p = parse_particle("(para*)").unwrap();
            let seq: Vec<String> = std::iter::repeat_with(|| "para".to_string())
                .take(count)
                .collect();
            prop_assert!(p.matches(&seq));
        }

        #[test]
        fn prop_plus_requires_at_least_one(count in 0usize..12) {
            let p = parse_particle("(para+)").unwrap();
            let seq: Vec<String> = std::iter::repeat_with(|| "para".to_string())
                .take(count)
                .collect();
            prop_assert_eq!(p.matches(&seq), count >= 1);
        }

        #[test]
        fn prop_choice_star_accepts_any_mix(
            picks in prop::collection::vec(prop_oneof![Just("para"), Just("sect1")], 0..10)
        ) {
            let p = parse_particle("((para | sect1)*)").unwrap();
            let seq: Vec<String> = picks.into_iter().map(String::from).collect();
            prop_assert!(p.matches(&seq));
        }
    }
}
