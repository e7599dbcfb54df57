use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::db::models::{Exam, Question};

/// Fresh per-attempt seed. Stored on the attempt so the order it produces is stable.
pub(crate) fn new_seed() -> i64 {
    rand::thread_rng().gen()
}

/// Orders questions (and their options) the way this attempt presents them.
/// The same seed always yields the same order; grading never depends on it.
pub(crate) fn arrange_for_attempt(
    exam: &Exam,
    seed: i64,
    mut questions: Vec<Question>,
) -> Vec<Question> {
    let mut rng = StdRng::seed_from_u64(seed as u64);

    if exam.randomize_questions {
        questions.shuffle(&mut rng);
    }
    if exam.randomize_options {
        for question in &mut questions {
            question.options.0.shuffle(&mut rng);
        }
    }
    questions
}
