//! Quiz question construction shared by learning and diagnostic sessions.

use crate::distractor::{glyph_distractors, reading_distractors, DEFAULT_DISTRACTOR_COUNT};
use crate::{Catalog, Item, QuizKind, QuizMode, QuizQuestion};
use rand::seq::SliceRandom;
use rand::Rng;

/// Resolve the configured mode to a concrete kind (mixed flips a fair coin)
pub fn choose_kind<R: Rng + ?Sized>(mode: QuizMode, rng: &mut R) -> QuizKind {
    match mode {
        QuizMode::ReadingToGlyph => QuizKind::ReadingToGlyph,
        QuizMode::GlyphToReading => QuizKind::GlyphToReading,
        QuizMode::Mixed => {
            if rng.gen_bool(0.5) {
                QuizKind::ReadingToGlyph
            } else {
                QuizKind::GlyphToReading
            }
        }
    }
}

/// Build one question for `item`
///
/// Options hold the correct answer once plus up to three distractors,
/// in random order.
pub fn build_question<R: Rng + ?Sized>(
    item: &Item,
    kind: QuizKind,
    catalog: &Catalog,
    id: String,
    rng: &mut R,
) -> QuizQuestion {
    let (prompt, correct_answer, distractors) = match kind {
        QuizKind::ReadingToGlyph => (
            format!("Which character is read \"{}\"?", item.reading),
            item.glyph.clone(),
            glyph_distractors(item, catalog, DEFAULT_DISTRACTOR_COUNT, rng),
        ),
        QuizKind::GlyphToReading => {
            let pool = catalog.readings();
            (
                format!("What is the reading of \"{}\"?", item.glyph),
                item.reading.clone(),
                reading_distractors(&item.reading, &pool, DEFAULT_DISTRACTOR_COUNT, rng),
            )
        }
    };

    let mut options = Vec::with_capacity(distractors.len() + 1);
    options.push(correct_answer.clone());
    options.extend(distractors);
    options.shuffle(rng);

    QuizQuestion {
        id,
        kind,
        prompt,
        correct_answer,
        options,
        examples: item.examples.clone(),
        explanation: None,
    }
}

/// Build one question per item, in item order
pub fn build_questions<R: Rng + ?Sized>(
    items: &[Item],
    mode: QuizMode,
    catalog: &Catalog,
    rng: &mut R,
) -> Vec<QuizQuestion> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let kind = choose_kind(mode, rng);
            build_question(item, kind, catalog, format!("question_{}", idx), rng)
        })
        .collect()
}

/// Diagnostic questions: always glyph-to-reading, with an explanation
pub fn build_diagnostic_questions<R: Rng + ?Sized>(
    items: &[Item],
    catalog: &Catalog,
    rng: &mut R,
) -> Vec<QuizQuestion> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let mut question = build_question(
                item,
                QuizKind::GlyphToReading,
                catalog,
                format!("diagnostic_{}", idx),
                rng,
            );
            question.prompt = item.glyph.clone();
            question.explanation = Some(format!(
                "\"{}\" is read \"{}\"",
                item.glyph, item.reading
            ));
            question
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sample_catalog;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn assert_well_formed(q: &QuizQuestion) {
        assert_eq!(q.options.len(), 4, "{:?}", q);
        let unique: HashSet<_> = q.options.iter().collect();
        assert_eq!(unique.len(), 4, "{:?}", q);
        assert_eq!(
            q.options.iter().filter(|o| **o == q.correct_answer).count(),
            1
        );
    }

    #[test]
    fn test_reading_to_glyph_question() {
        let catalog = sample_catalog();
        let mut rng = StdRng::seed_from_u64(1);
        let item = catalog.by_glyph("字").unwrap();
        let q = build_question(item, QuizKind::ReadingToGlyph, &catalog, "q".into(), &mut rng);

        assert_eq!(q.correct_answer, "字");
        assert!(q.prompt.contains("zì"));
        assert_eq!(q.examples, vec!["汉字"]);
        assert_well_formed(&q);
        // 自 shares the exact reading and must not appear
        assert!(!q.options.contains(&"自".to_string()));
    }

    #[test]
    fn test_glyph_to_reading_question() {
        let catalog = sample_catalog();
        let mut rng = StdRng::seed_from_u64(2);
        let item = catalog.by_glyph("十").unwrap();
        let q = build_question(item, QuizKind::GlyphToReading, &catalog, "q".into(), &mut rng);

        assert_eq!(q.correct_answer, "shí");
        assert_well_formed(&q);
        // Tone variants shì and shǐ are the closest confusions
        assert!(q.options.contains(&"shì".to_string()));
        assert!(q.options.contains(&"shǐ".to_string()));
    }

    #[test]
    fn test_fixed_mode_applies_to_every_item() {
        let catalog = sample_catalog();
        let mut rng = StdRng::seed_from_u64(3);
        let items: Vec<Item> = catalog.all()[..8].to_vec();
        let questions = build_questions(&items, QuizMode::GlyphToReading, &catalog, &mut rng);

        assert_eq!(questions.len(), 8);
        assert!(questions.iter().all(|q| q.kind == QuizKind::GlyphToReading));
        assert_eq!(questions[3].id, "question_3");
        for q in &questions {
            assert_well_formed(q);
        }
    }

    #[test]
    fn test_mixed_mode_produces_both_kinds() {
        let catalog = sample_catalog();
        let mut rng = StdRng::seed_from_u64(4);
        let items: Vec<Item> = catalog.all().to_vec();
        let questions = build_questions(&items, QuizMode::Mixed, &catalog, &mut rng);

        assert!(questions.iter().any(|q| q.kind == QuizKind::ReadingToGlyph));
        assert!(questions.iter().any(|q| q.kind == QuizKind::GlyphToReading));
    }

    #[test]
    fn test_diagnostic_questions() {
        let catalog = sample_catalog();
        let mut rng = StdRng::seed_from_u64(5);
        let items: Vec<Item> = catalog.all()[..3].to_vec();
        let questions = build_diagnostic_questions(&items, &catalog, &mut rng);

        assert_eq!(questions[0].id, "diagnostic_0");
        assert_eq!(questions[0].prompt, "的");
        assert!(questions[0].explanation.is_some());
        assert!(questions.iter().all(|q| q.kind == QuizKind::GlyphToReading));
    }

    #[test]
    fn test_tiny_catalog_keeps_options_unique() {
        let catalog = Catalog::from_items(vec![
            Item::new(1, "字", "zì", Vec::new()),
            Item::new(2, "子", "zǐ", Vec::new()),
        ])
        .unwrap();
        let mut rng = StdRng::seed_from_u64(6);
        let q = build_question(
            catalog.by_glyph("字").unwrap(),
            QuizKind::GlyphToReading,
            &catalog,
            "q".into(),
            &mut rng,
        );
        assert_eq!(q.options.len(), 2);
        let unique: HashSet<_> = q.options.iter().collect();
        assert_eq!(unique.len(), 2);
    }
}
