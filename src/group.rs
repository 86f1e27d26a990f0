//! Fragment generation and token-budget group assembly.
//!
//! Units that fit the per-fragment cap pass through whole; oversize
//! units are sentence-split and re-buffered, with a hard chop at the
//! count-unit boundary for sentences that still do not fit. Groups are
//! then packed up to the group budget, each new group seeded with the
//! previous group's last two fragments so the model sees context on
//! both sides of every boundary.

use crate::splitter::split_paragraph;
use crate::tokenizer::TokenCounter;

/// A contiguous span of one translation unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    /// Index of the unit this fragment came from
    pub index: usize,
    /// Size in the configured count unit
    pub count: usize,
}

/// Two-phase splitter: units -> fragments -> overlapping groups
#[derive(Debug, Clone)]
pub struct FragmentGrouper {
    max_fragment: usize,
    max_group: usize,
    counter: TokenCounter,
}

impl FragmentGrouper {
    pub fn new(max_fragment: usize, max_group: usize, counter: TokenCounter) -> Self {
        Self {
            max_fragment,
            max_group,
            counter,
        }
    }

    /// Assemble `units` into ordered groups of fragments.
    ///
    /// Discarding the overlap copies (see [`drop_overlap`]) yields every
    /// fragment exactly once, in order.
    pub fn split(&self, units: &[String]) -> Vec<Vec<Fragment>> {
        let mut fragments: Vec<Fragment> = Vec::new();
        for (index, text) in units.iter().enumerate() {
            self.collect_unit(index, text, &mut fragments);
        }

        let mut groups: Vec<Vec<Fragment>> = Vec::new();
        let mut current: Vec<Fragment> = Vec::new();
        let mut sum_count = 0usize;

        for fragment in fragments {
            if !current.is_empty() && sum_count + fragment.count > self.max_group {
                if current.len() > 2 {
                    let seeds = current[current.len() - 2..].to_vec();
                    // Only the trailing seed is charged to the new budget;
                    // its partner rides along as context.
                    sum_count = seeds[1].count;
                    groups.push(std::mem::replace(&mut current, seeds));
                } else {
                    sum_count = 0;
                    groups.push(std::mem::take(&mut current));
                }
            }
            sum_count += fragment.count;
            current.push(fragment);
        }

        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// Phase 1: cut one unit into fragments within the per-fragment cap
    fn collect_unit(&self, index: usize, text: &str, out: &mut Vec<Fragment>) {
        let count = self.counter.count(text);
        if count <= self.max_fragment {
            out.push(Fragment {
                text: text.to_string(),
                index,
                count,
            });
            return;
        }

        let mut buffer = String::new();
        let mut buffer_count = 0usize;

        for sentence in split_paragraph(text) {
            let sentence_count = self.counter.count(&sentence);
            if buffer_count + sentence_count <= self.max_fragment {
                buffer.push_str(&sentence);
                buffer_count += sentence_count;
                continue;
            }

            if buffer_count > 0 {
                self.push_fragment(index, std::mem::take(&mut buffer), out);
                buffer_count = 0;
            }

            let mut rest = sentence;
            while self.counter.count(&rest) > self.max_fragment {
                let (head, tail) = self.counter.split_at(&rest, self.max_fragment);
                self.push_fragment(index, head, out);
                rest = tail;
            }
            if !rest.is_empty() {
                buffer_count = self.counter.count(&rest);
                buffer = rest;
            }
        }

        if buffer_count > 0 {
            self.push_fragment(index, buffer, out);
        }
    }

    fn push_fragment(&self, index: usize, text: String, out: &mut Vec<Fragment>) {
        let count = self.counter.count(&text);
        out.push(Fragment { text, index, count });
    }
}

/// Remove the context-only copies from group `position` of `total`.
///
/// The leading fragment is dropped when the previous group carried seeds
/// (it had more than two fragments); the trailing fragment is dropped
/// when this group seeds the next one. Applying this to every group
/// leaves each fragment represented exactly once.
pub fn drop_overlap<T>(
    items: &mut Vec<T>,
    position: usize,
    total: usize,
    group_len: usize,
    previous_group_len: usize,
) {
    if position > 0 && previous_group_len > 2 && !items.is_empty() {
        items.remove(0);
    }
    if position + 1 < total && group_len > 2 && !items.is_empty() {
        items.pop();
    }
}

/// Pack a flat list of texts into budget-bounded batches, no overlap.
///
/// Used for metadata and TOC entries; an entry longer than the whole
/// budget is truncated to it.
pub fn chunk_list(texts: &[String], max_group: usize, counter: &TokenCounter) -> Vec<Vec<String>> {
    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_count = 0usize;

    for text in texts {
        let mut text = text.clone();
        let mut count = counter.count(&text);
        if count > max_group {
            let (head, _) = counter.split_at(&text, max_group);
            text = head;
            count = counter.count(&text);
        }

        if !current.is_empty() && current_count + count > max_group {
            batches.push(std::mem::take(&mut current));
            current_count = 0;
        }
        current.push(text);
        current_count += count;
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CountUnit;

    fn char_grouper(max_fragment: usize, max_group: usize) -> FragmentGrouper {
        FragmentGrouper::new(max_fragment, max_group, TokenCounter::new(CountUnit::Char))
    }

    #[test]
    fn test_small_units_pass_through() {
        let grouper = char_grouper(40, 100);
        let units = vec!["short one".to_string(), "short two".to_string()];
        let groups = grouper.split(&units);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][0].index, 0);
        assert_eq!(groups[0][1].index, 1);
        assert_eq!(groups[0][0].text, "short one");
    }

    #[test]
    fn test_overlap_seeding() {
        // Six 30-char fragments against a 100 budget: the second and
        // third groups open with the previous group's last two.
        let grouper = char_grouper(40, 100);
        let units: Vec<String> = (0..6).map(|i| format!("{i}").repeat(30)).collect();
        let groups = grouper.split(&units);

        let indices: Vec<Vec<usize>> = groups
            .iter()
            .map(|g| g.iter().map(|f| f.index).collect())
            .collect();
        assert_eq!(indices, vec![vec![0, 1, 2], vec![1, 2, 3, 4], vec![3, 4, 5]]);
    }

    #[test]
    fn test_drop_overlap_yields_each_fragment_once() {
        let grouper = char_grouper(40, 100);
        let units: Vec<String> = (0..6).map(|i| format!("{i}").repeat(30)).collect();
        let groups = grouper.split(&units);

        let total = groups.len();
        let mut seen: Vec<usize> = Vec::new();
        for (position, group) in groups.iter().enumerate() {
            let mut kept: Vec<usize> = group.iter().map(|f| f.index).collect();
            let previous_len = if position > 0 {
                groups[position - 1].len()
            } else {
                0
            };
            drop_overlap(&mut kept, position, total, group.len(), previous_len);
            seen.extend(kept);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_no_overlap_from_tiny_group() {
        // A closed group of <= 2 fragments carries no seeds forward.
        let grouper = char_grouper(60, 100);
        let units: Vec<String> = (0..4).map(|i| format!("{i}").repeat(60)).collect();
        let groups = grouper.split(&units);
        for window in groups.windows(2) {
            if window[0].len() <= 2 {
                let last_of_prev = window[0].last().map(|f| f.index);
                let first_of_next = window[1].first().map(|f| f.index);
                assert_ne!(last_of_prev, first_of_next);
            }
        }
    }

    #[test]
    fn test_oversize_unit_sentence_split() {
        let grouper = char_grouper(60, 500);
        let text = "This is the first sentence of the paragraph. \
                    And here comes the second one, a bit longer. \
                    Finally the third sentence closes it."
            .to_string();
        let groups = grouper.split(&[text.clone()]);
        let fragments: Vec<&Fragment> = groups.iter().flatten().collect();
        assert!(fragments.len() > 1);
        for fragment in &fragments {
            assert_eq!(fragment.index, 0);
            assert!(fragment.count <= 60);
        }
        let rejoined: String = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_hard_chop_for_unbreakable_text() {
        let grouper = char_grouper(10, 500);
        let text = "x".repeat(35);
        let groups = grouper.split(&[text.clone()]);
        let fragments: Vec<&Fragment> = groups.iter().flatten().collect();
        assert_eq!(fragments.len(), 4);
        assert!(fragments.iter().all(|f| f.count <= 10));
        let rejoined: String = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_token_mode_budgets() {
        let counter = TokenCounter::new(CountUnit::Token);
        let grouper = FragmentGrouper::new(16, 64, counter);
        let unit = "One sentence about nothing in particular. Another sentence follows it. \
                    And a third keeps the paragraph going for a while longer."
            .to_string();
        let groups = grouper.split(&[unit.clone()]);
        for fragment in groups.iter().flatten() {
            assert!(fragment.count <= 16, "fragment over cap: {fragment:?}");
        }
        let rejoined: String = groups
            .iter()
            .flatten()
            .map(|f| f.text.as_str())
            .collect();
        assert_eq!(rejoined, unit);
    }

    #[test]
    fn test_chunk_list_respects_budget() {
        let counter = TokenCounter::new(CountUnit::Char);
        let texts: Vec<String> = (0..5).map(|i| format!("{i}").repeat(30)).collect();
        let batches = chunk_list(&texts, 70, &counter);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        let flattened: Vec<String> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, texts);
    }

    #[test]
    fn test_chunk_list_truncates_monster_entry() {
        let counter = TokenCounter::new(CountUnit::Char);
        let texts = vec!["a".repeat(500)];
        let batches = chunk_list(&texts, 100, &counter);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].chars().count(), 100);
    }
}
