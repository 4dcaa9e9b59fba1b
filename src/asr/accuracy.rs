//! Word error rate between a reference text and a transcript.

/// Scores `hypothesis` against `reference` as word-level edit distance divided
/// by the number of reference words.
///
/// Words are runs of non-whitespace. An empty reference scores 0.0 against an
/// empty hypothesis and 1.0 against anything else. The score is not clamped:
/// a hypothesis much longer than the reference can score above 1.0.
pub fn word_error_rate(reference: &str, hypothesis: &str) -> f64 {
    let ref_words: Vec<&str> = reference.split_whitespace().collect();
    let hyp_words: Vec<&str> = hypothesis.split_whitespace().collect();

    if ref_words.is_empty() {
        return if hyp_words.is_empty() { 0.0 } else { 1.0 };
    }

    let distance = edit_distance(&ref_words, &hyp_words);
    distance as f64 / ref_words.len() as f64
}

/// Minimum number of insertions, deletions and substitutions turning `a` into `b`.
fn edit_distance(a: &[&str], b: &[&str]) -> usize {
    // single-row DP; `prev[j]` holds the distance between a[..i-1] and b[..j]
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let substitution = prev[j - 1] + usize::from(a[i - 1] != b[j - 1]);
            let deletion = prev[j] + 1;
            let insertion = curr[j - 1] + 1;
            curr[j] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
