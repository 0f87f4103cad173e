use crate::core::model::{DiffOp, DiffSpan, TextDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Keep(char),
    Delete(char),
    Insert(char),
}

/// Character-level alignment of `expected` against `actual`.
///
/// The common prefix and suffix are split off first; the remainder is
/// aligned by longest common subsequence in memory linear in the input. Runs of deletions and insertions
/// between two equal spans collapse into a single `replace` span.
pub fn diff_chars(expected: &str, actual: &str) -> TextDiff {
    let a: Vec<char> = expected.chars().collect();
    let b: Vec<char> = actual.chars().collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut builder = SpanBuilder::default();
    for &c in &a[..prefix] {
        builder.push(Edit::Keep(c));
    }
    for edit in align(&a[prefix..a.len() - suffix], &b[prefix..b.len() - suffix]) {
        builder.push(edit);
    }
    for &c in &a[a.len() - suffix..] {
        builder.push(Edit::Keep(c));
    }
    builder.finish()
}

fn align(a: &[char], b: &[char]) -> Vec<Edit> {
    let mut edits = Vec::with_capacity(a.len() + b.len());
    hirschberg(a, b, &mut edits);
    edits
}

/// Linear-space LCS alignment: split `a` in half, find where the optimal
/// path crosses the middle row, recurse on both quadrants.
fn hirschberg(a: &[char], b: &[char], edits: &mut Vec<Edit>) {
    if a.is_empty() {
        edits.extend(b.iter().map(|&c| Edit::Insert(c)));
        return;
    }
    if b.is_empty() {
        edits.extend(a.iter().map(|&c| Edit::Delete(c)));
        return;
    }
    if a.len() == 1 {
        match b.iter().position(|&c| c == a[0]) {
            Some(j) => {
                edits.extend(b[..j].iter().map(|&c| Edit::Insert(c)));
                edits.push(Edit::Keep(a[0]));
                edits.extend(b[j + 1..].iter().map(|&c| Edit::Insert(c)));
            }
            None => {
                edits.push(Edit::Delete(a[0]));
                edits.extend(b.iter().map(|&c| Edit::Insert(c)));
            }
        }
        return;
    }

    let mid = a.len() / 2;
    let forward = lcs_last_row(a[..mid].iter(), b.iter());
    let backward = lcs_last_row(a[mid..].iter().rev(), b.iter().rev());
    let split = (0..=b.len())
        .max_by_key(|&j| (forward[j] + backward[b.len() - j], std::cmp::Reverse(j)))
        .unwrap_or(0);

    hirschberg(&a[..mid], &b[..split], edits);
    hirschberg(&a[mid..], &b[split..], edits);
}

/// LCS lengths of all of `a` against every prefix of `b`, in two rows.
fn lcs_last_row<'a, A, B>(a: A, b: B) -> Vec<u32>
where
    A: Iterator<Item = &'a char>,
    B: Iterator<Item = &'a char> + Clone,
{
    let width = b.clone().count() + 1;
    let mut prev = vec![0u32; width];
    let mut cur = vec![0u32; width];
    for x in a {
        for (j, y) in b.clone().enumerate() {
            cur[j + 1] = if x == y {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev
}

#[derive(Default)]
struct SpanBuilder {
    spans: Vec<DiffSpan>,
    deleted: String,
    inserted: String,
}

impl SpanBuilder {
    fn push(&mut self, edit: Edit) {
        match edit {
            Edit::Keep(c) => {
                self.flush_changes();
                match self.spans.last_mut() {
                    Some(span) if span.op == DiffOp::Equal => {
                        span.expected.push(c);
                        span.actual.push(c);
                    }
                    _ => self.spans.push(DiffSpan {
                        op: DiffOp::Equal,
                        expected: c.to_string(),
                        actual: c.to_string(),
                    }),
                }
            }
            Edit::Delete(c) => self.deleted.push(c),
            Edit::Insert(c) => self.inserted.push(c),
        }
    }

    fn flush_changes(&mut self) {
        let expected = std::mem::take(&mut self.deleted);
        let actual = std::mem::take(&mut self.inserted);
        let op = match (expected.is_empty(), actual.is_empty()) {
            (true, true) => return,
            (false, true) => DiffOp::Delete,
            (true, false) => DiffOp::Insert,
            (false, false) => DiffOp::Replace,
        };
        self.spans.push(DiffSpan { op, expected, actual });
    }

    fn finish(mut self) -> TextDiff {
        self.flush_changes();
        TextDiff { spans: self.spans }
    }
}
