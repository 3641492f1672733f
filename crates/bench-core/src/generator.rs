use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::INVALID_BOOK_ID;

pub const EMAIL_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ_";
pub const EMAIL_DOMAIN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const REVIEW_TEXT_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ_. ;";

/// One synthetic review. Generated per call, consumed once.
#[derive(Debug, Clone)]
pub struct Review {
    pub book_id: u32,
    pub email: String,
    pub review: String,
}

/// Anything the workers can draw reviews from. The default implementation
/// is [`ReviewGenerator`]; stubs stand in for it when a run needs a fixed
/// workload shape.
pub trait ReviewSource: Send {
    fn next_review(&mut self) -> Review;
}

/// Synthetic review generator. Each worker owns its own instance so there
/// is no shared mutable state; a configured seed makes the stream
/// reproducible per worker.
pub struct ReviewGenerator {
    books: u32,
    rng: StdRng,
}

impl ReviewGenerator {
    /// `stream` is mixed into the seed so concurrent generators produce
    /// distinct but reproducible sequences.
    pub fn new(books: u32, seed: Option<u64>, stream: u64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        };
        Self { books, rng }
    }
}

impl ReviewSource for ReviewGenerator {
    fn next_review(&mut self) -> Review {
        let mut book_id = self.rng.gen_range(1..=self.books);

        // One call in a hundred targets a book that does not exist, to
        // exercise the service's validation path.
        if self.rng.gen_range(0..100) == 0 {
            book_id = INVALID_BOOK_ID;
        }

        let email = format!(
            "{}@{}.{}",
            random_text(&mut self.rng, 25, EMAIL_ID_CHARSET),
            random_text(&mut self.rng, 5, EMAIL_DOMAIN_CHARSET),
            random_text(&mut self.rng, 3, EMAIL_DOMAIN_CHARSET),
        );
        let review = random_text(&mut self.rng, 100, REVIEW_TEXT_CHARSET);

        Review {
            book_id,
            email,
            review,
        }
    }
}

fn random_text(rng: &mut StdRng, len: usize, charset: &[u8]) -> String {
    (0..len)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}
