//! Trivia questions, fortune cookies, and the propagation calculator.
//!
//! Data files are plain text so sysops can edit them in place: one fortune per
//! line, and trivia as `question|answer[|category]`. Missing or empty files
//! degrade to a polite "unavailable" reply rather than an error.

use rand::seq::SliceRandom;
use std::fs;

#[derive(Debug, Clone, PartialEq)]
pub struct TriviaQuestion {
    pub question: String,
    pub answer: String,
}

/// Pick a random trivia question from the file, or `None` when the file is
/// missing, unreadable, or contains no well-formed lines.
pub fn random_trivia(path: &str) -> Option<TriviaQuestion> {
    let content = fs::read_to_string(path).ok()?;
    let questions: Vec<TriviaQuestion> = content
        .lines()
        .filter_map(parse_trivia_line)
        .collect();
    questions.choose(&mut rand::thread_rng()).cloned()
}

fn parse_trivia_line(line: &str) -> Option<TriviaQuestion> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.splitn(3, '|');
    let question = parts.next()?.trim();
    let answer = parts.next()?.trim();
    if question.is_empty() || answer.is_empty() {
        return None;
    }
    Some(TriviaQuestion {
        question: question.to_string(),
        answer: answer.to_string(),
    })
}

/// Forgiving answer check: either string containing the other counts, so
/// "heltec v3" matches "Heltec" and vice versa.
pub fn answer_matches(user: &str, correct: &str) -> bool {
    let user = user.trim().to_lowercase();
    let correct = correct.trim().to_lowercase();
    if user.is_empty() {
        return false;
    }
    user.contains(&correct) || correct.contains(&user)
}

/// Pick a random fortune line, or `None` when the file yields nothing.
pub fn random_fortune(path: &str) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let fortunes: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    fortunes
        .choose(&mut rand::thread_rng())
        .map(|s| s.to_string())
}

/// Radio horizon estimate: distance (miles) ≈ 1.23 × √height_feet.
pub fn radio_horizon_miles(height_ft: f64) -> f64 {
    1.23 * height_ft.sqrt()
}

/// Rough Fresnel-clearance verdict for an antenna height.
pub fn horizon_condition(height_ft: f64) -> &'static str {
    if height_ft < 10.0 {
        "Poor - obstacles likely"
    } else if height_ft < 30.0 {
        "Fair - some obstacles"
    } else if height_ft < 100.0 {
        "Good - clear path likely"
    } else {
        "Excellent - long range possible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn trivia_lines_parse_and_skip_junk() {
        assert_eq!(
            parse_trivia_line("What modulation does LoRa use?|Chirp Spread Spectrum|A"),
            Some(TriviaQuestion {
                question: "What modulation does LoRa use?".into(),
                answer: "Chirp Spread Spectrum".into(),
            })
        );
        assert_eq!(parse_trivia_line("no delimiter here"), None);
        assert_eq!(parse_trivia_line("   "), None);
        assert_eq!(parse_trivia_line("question|"), None);
    }

    #[test]
    fn answer_matching_is_fuzzy_both_ways() {
        assert!(answer_matches("chirp spread spectrum", "Chirp Spread Spectrum"));
        assert!(answer_matches("chirp", "Chirp Spread Spectrum"));
        assert!(answer_matches("The Chirp Spread Spectrum thing", "Chirp Spread Spectrum"));
        assert!(!answer_matches("fsk", "Chirp Spread Spectrum"));
        assert!(!answer_matches("", "anything"));
    }

    #[test]
    fn fortunes_come_from_the_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "only fortune").unwrap();
        let got = random_fortune(tmp.path().to_str().unwrap());
        assert_eq!(got.as_deref(), Some("only fortune"));
        assert_eq!(random_fortune("/nonexistent/fortunes.txt"), None);
    }

    #[test]
    fn horizon_math_and_conditions() {
        assert!((radio_horizon_miles(100.0) - 12.3).abs() < 1e-9);
        assert_eq!(horizon_condition(5.0), "Poor - obstacles likely");
        assert_eq!(horizon_condition(20.0), "Fair - some obstacles");
        assert_eq!(horizon_condition(50.0), "Good - clear path likely");
        assert_eq!(horizon_condition(150.0), "Excellent - long range possible");
    }
}
