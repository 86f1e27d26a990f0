//! Sentence-aware paragraph splitting.
//!
//! Splits a paragraph into sentence-like fragments while respecting
//! bracket/quote nesting and ambiguous periods, so that downstream
//! grouping never cuts a translation batch in the middle of a clause.

/// Fragments shorter than this are glued onto the previous sentence.
/// Absorbs danglers like `C.` left behind by abbreviation handling.
const MIN_SENTENCE_LEN: usize = 12;

/// Characters that close a sentence outright once brackets are balanced
const STOP_CHARS: [char; 7] = ['?', '!', '。', '；', '？', '！', ';'];

/// Separators that reset the word counter, letting a following period
/// read as an abbreviation rather than a sentence end
const SEPARATOR_CHARS: [char; 2] = [',', ':'];

/// Expected closing character for an opening bracket or quote
fn closing_bracket(ch: char) -> Option<char> {
    match ch {
        '[' => Some(']'),
        '(' => Some(')'),
        '"' => Some('"'),
        '\'' => Some('\''),
        '“' => Some('”'),
        '‘' => Some('’'),
        '「' => Some('」'),
        '【' => Some('】'),
        '（' => Some('）'),
        _ => None,
    }
}

/// Split a paragraph into sentences.
///
/// Total over all inputs: the concatenation of the result equals the
/// input, no element is empty, and an empty input yields an empty list.
pub fn split_paragraph(text: &str) -> Vec<String> {
    let mut words_in_sentence: usize = 0;
    let mut is_read_words = false;
    let mut bracket_stack: Vec<char> = Vec::new();
    let mut sentences: Vec<String> = Vec::new();
    let mut buffer = String::new();

    for ch in text.chars() {
        buffer.push(ch);

        if SEPARATOR_CHARS.contains(&ch) {
            words_in_sentence = 0;
        } else if is_read_words && ch.is_whitespace() {
            words_in_sentence += 1;
            is_read_words = false;
        } else if !is_read_words && !ch.is_whitespace() {
            is_read_words = true;
        }

        // A symmetric quote pops before it can push again, so the second
        // occurrence always reads as the close.
        if bracket_stack.last() == Some(&ch) {
            bracket_stack.pop();
        } else if let Some(close) = closing_bracket(ch) {
            bracket_stack.push(close);
        } else if bracket_stack.is_empty()
            && (STOP_CHARS.contains(&ch) || (words_in_sentence > 1 && ch == '.'))
        {
            words_in_sentence = 0;
            sentences.push(std::mem::take(&mut buffer));
        }
    }

    if !buffer.is_empty() {
        sentences.push(buffer);
    }

    let mut merged: Vec<String> = Vec::new();
    for sentence in sentences {
        match merged.last_mut() {
            Some(last) if sentence.chars().count() < MIN_SENTENCE_LEN => {
                last.push_str(&sentence);
            }
            _ => merged.push(sentence),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(split_paragraph("").is_empty());
    }

    #[test]
    fn test_normal_english() {
        assert_eq!(
            split_paragraph(
                "The reckoning by five does not amount to such a variation of the decimal \
                 system as that which was in use among the Celts and Danes. these peoples had \
                 a vigesimal system, traces of which are still left in the French \
                 quatre-vingts, quatre-vingt-treize, &c., and in our score, three-score and \
                 ten, twenty-one, &c."
            ),
            vec![
                "The reckoning by five does not amount to such a variation of the decimal \
                 system as that which was in use among the Celts and Danes.",
                " these peoples had a vigesimal system, traces of which are still left in the \
                 French quatre-vingts, quatre-vingt-treize, &c., and in our score, three-score \
                 and ten, twenty-one, &c.",
            ],
        );
    }

    #[test]
    fn test_normal_chinese() {
        assert_eq!(
            split_paragraph("第一句。第二句！"),
            vec!["第一句。", "第二句！"],
        );
    }

    #[test]
    fn test_chinese_with_quotes() {
        assert_eq!(
            split_paragraph(
                "换言之，穷人的幸福（他的所有希望应说是很容易找到活儿干并不遭歉收之苦）迟早要从富人的繁荣中走出来，不是吗？\
                 当时任梅斯总督的年轻的卡洛纳说：“一般来说，雇农及短工与耕农的关系，就是辅助与主要的关系，当人们改善了耕农的命运时，就不必为雇农和短工的命运焦虑了；"
            ),
            vec![
                "换言之，穷人的幸福（他的所有希望应说是很容易找到活儿干并不遭歉收之苦）迟早要从富人的繁荣中走出来，不是吗？",
                "当时任梅斯总督的年轻的卡洛纳说：“一般来说，雇农及短工与耕农的关系，就是辅助与主要的关系，当人们改善了耕农的命运时，就不必为雇农和短工的命运焦虑了；",
            ],
        );
    }

    #[test]
    fn test_bracketed_period_does_not_split() {
        assert_eq!(
            split_paragraph("This (it was original. not derived). The next sentence here."),
            vec![
                "This (it was original. not derived).",
                " The next sentence here.",
            ],
        );
    }

    #[test]
    fn test_trailing_abbreviation_absorbed() {
        assert_eq!(
            split_paragraph("The period from the late fourth to the late second century B.C."),
            vec!["The period from the late fourth to the late second century B.C."],
        );
    }

    #[test]
    fn test_abbreviation_mid_text() {
        assert_eq!(
            split_paragraph(
                "This use of the letters of the alphabet as numerals (it was original with the \
                 Greeks. they did not derive it from the Phoenicians). The earliest occurrence \
                 of numerals written in this way appears to be in a Halicarnassian inscription \
                 of date not long after 450 B.C."
            ),
            vec![
                "This use of the letters of the alphabet as numerals (it was original with the \
                 Greeks. they did not derive it from the Phoenicians).",
                " The earliest occurrence of numerals written in this way appears to be in a \
                 Halicarnassian inscription of date not long after 450 B.C.",
            ],
        );
    }

    #[test]
    fn test_inline_markup_passes_through() {
        let input = "<i>ἀγεωμέτρητος μηδεὶς εἰσίτω</i>, said the inscription over the door. \
                     Euclid was a no less typical Greek.";
        let sentences = split_paragraph(input);
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].ends_with("over the door."));
    }

    #[test]
    fn test_concatenation_preserves_content() {
        let inputs = [
            "One. Two! Three? 四。五；Six: and, seven... done.",
            "unbalanced (never closed so no split happens. at all",
            "   \n leading space. trailing too ",
            "短。短。短。",
        ];
        for input in inputs {
            let sentences = split_paragraph(input);
            assert_eq!(sentences.concat(), input, "content lost for {input:?}");
            assert!(sentences.iter().all(|s| !s.is_empty()));
        }
    }

    #[test]
    fn test_no_short_sentence_except_singleton() {
        let sentences = split_paragraph("Hi. Ok. A much longer sentence follows here. Bye.");
        for (i, sentence) in sentences.iter().enumerate() {
            if sentences.len() > 1 && i > 0 {
                assert!(sentence.chars().count() >= MIN_SENTENCE_LEN);
            }
        }
        // A lone short fragment stays as-is
        assert_eq!(split_paragraph("Hi."), vec!["Hi."]);
    }
}
