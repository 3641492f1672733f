use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use crate::generator::Review;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The call never completed a round-trip (timeout, disconnect, ...).
    #[error("transport error: {0}")]
    Transport(String),
    /// The service answered with something we cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Domain result of one review submission. Rejections are valid business
/// outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewCode {
    Accepted,
    InvalidBook,
    OverLimit,
}

impl ReviewCode {
    pub fn from_wire(code: u8) -> Option<Self> {
        match code {
            0 => Some(ReviewCode::Accepted),
            1 => Some(ReviewCode::InvalidBook),
            2 => Some(ReviewCode::OverLimit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub code: ReviewCode,
    /// Processing latency the service reports for itself, when it does.
    pub internal: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookStanding {
    pub book_id: u32,
    pub book_name: String,
    pub reviews: u64,
}

pub type ServiceCall<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// A live session with one review service endpoint. Implementations must
/// tolerate concurrent calls from every worker.
pub trait ReviewService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Populates the static book table before the run.
    fn initialize<'a>(&'a self, books: u32, book_names_csv: &'a str) -> ServiceCall<'a, ()>;

    fn submit_review<'a>(
        &'a self,
        review: &'a Review,
        max_reviews: u32,
    ) -> ServiceCall<'a, ReviewOutcome>;

    /// Per-book review totals, most reviewed first.
    fn standings<'a>(&'a self) -> ServiceCall<'a, Vec<BookStanding>>;
}

/// What the in-memory service does with each submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Enforce the real service's business rules against in-memory state.
    Faithful,
    /// Accept everything (useful to measure the harness itself).
    AlwaysAccept,
    /// Fail every call at the transport level.
    FailTransport,
}

#[derive(Default)]
struct MockState {
    book_names: Vec<String>,
    reviews_by_email: HashMap<String, u32>,
    reviews_by_book: HashMap<u32, u64>,
}

/// In-memory stand-in for the review service, with a simulated call delay.
pub struct MockService {
    behavior: MockBehavior,
    delay: Duration,
    state: Mutex<MockState>,
}

impl MockService {
    pub fn new(behavior: MockBehavior, delay: Duration) -> Self {
        Self {
            behavior,
            delay,
            state: Mutex::new(MockState::default()),
        }
    }
}

impl ReviewService for MockService {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn initialize<'a>(&'a self, books: u32, book_names_csv: &'a str) -> ServiceCall<'a, ()> {
        Box::pin(async move {
            let mut names: Vec<String> = book_names_csv
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .take(books as usize)
                .collect();
            while (names.len() as u32) < books {
                names.push(format!("Book {}", names.len() + 1));
            }

            let mut state = self.state.lock();
            state.book_names = names;
            state.reviews_by_email.clear();
            state.reviews_by_book.clear();
            Ok(())
        })
    }

    fn submit_review<'a>(
        &'a self,
        review: &'a Review,
        max_reviews: u32,
    ) -> ServiceCall<'a, ReviewOutcome> {
        Box::pin(async move {
            sleep(self.delay).await;
            // Attribute half of the simulated delay to the server side.
            let internal = Some(self.delay / 2);

            match self.behavior {
                MockBehavior::FailTransport => {
                    Err(ServiceError::Transport("injected failure".to_string()))
                }
                MockBehavior::AlwaysAccept => {
                    let mut state = self.state.lock();
                    *state.reviews_by_book.entry(review.book_id).or_insert(0) += 1;
                    Ok(ReviewOutcome {
                        code: ReviewCode::Accepted,
                        internal,
                    })
                }
                MockBehavior::Faithful => {
                    let mut state = self.state.lock();
                    let books = state.book_names.len() as u32;
                    if review.book_id == 0 || review.book_id > books {
                        return Ok(ReviewOutcome {
                            code: ReviewCode::InvalidBook,
                            internal,
                        });
                    }
                    let submitted = state
                        .reviews_by_email
                        .entry(review.email.clone())
                        .or_insert(0);
                    if *submitted >= max_reviews {
                        return Ok(ReviewOutcome {
                            code: ReviewCode::OverLimit,
                            internal,
                        });
                    }
                    *submitted += 1;
                    *state.reviews_by_book.entry(review.book_id).or_insert(0) += 1;
                    Ok(ReviewOutcome {
                        code: ReviewCode::Accepted,
                        internal,
                    })
                }
            }
        })
    }

    fn standings<'a>(&'a self) -> ServiceCall<'a, Vec<BookStanding>> {
        Box::pin(async move {
            let state = self.state.lock();
            let mut standings: Vec<BookStanding> = state
                .book_names
                .iter()
                .enumerate()
                .map(|(idx, name)| {
                    let book_id = idx as u32 + 1;
                    BookStanding {
                        book_id,
                        book_name: name.clone(),
                        reviews: state.reviews_by_book.get(&book_id).copied().unwrap_or(0),
                    }
                })
                .collect();
            standings.sort_by(|a, b| b.reviews.cmp(&a.reviews).then(a.book_id.cmp(&b.book_id)));
            Ok(standings)
        })
    }
}

#[derive(Serialize)]
struct ReviewRequestBody<'a> {
    email: &'a str,
    review: &'a str,
    book_id: u32,
    max_reviews: u32,
}

#[derive(Deserialize)]
struct ReviewResponseBody {
    code: u8,
    #[serde(default)]
    internal_micros: Option<u64>,
}

/// HTTP/JSON session with one review service endpoint.
pub struct HttpJsonService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJsonService {
    pub fn new(client: reqwest::Client, host: &str, port: u16) -> Self {
        Self {
            client,
            base_url: format!("http://{host}:{port}"),
        }
    }
}

/// Pulls a usable message out of an error response body, if there is one.
fn error_body_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

impl ReviewService for HttpJsonService {
    fn name(&self) -> &'static str {
        "http"
    }

    fn initialize<'a>(&'a self, books: u32, book_names_csv: &'a str) -> ServiceCall<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/initialize", self.base_url);
            let body = serde_json::json!({ "books": books, "book_names": book_names_csv });
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| ServiceError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ServiceError::Protocol(format!(
                    "initialize returned status {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }

    fn submit_review<'a>(
        &'a self,
        review: &'a Review,
        max_reviews: u32,
    ) -> ServiceCall<'a, ReviewOutcome> {
        Box::pin(async move {
            let url = format!("{}/reviews", self.base_url);
            let body = ReviewRequestBody {
                email: &review.email,
                review: &review.review,
                book_id: review.book_id,
                max_reviews,
            };

            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| ServiceError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let bytes = response.bytes().await.unwrap_or_default();
                let detail = error_body_message(&bytes)
                    .unwrap_or_else(|| "no error detail".to_string());
                return Err(ServiceError::Protocol(format!(
                    "review returned status {status}: {detail}"
                )));
            }

            let body: ReviewResponseBody = response
                .json()
                .await
                .map_err(|e| ServiceError::Protocol(e.to_string()))?;
            let code = ReviewCode::from_wire(body.code).ok_or_else(|| {
                ServiceError::Protocol(format!("unknown result code {}", body.code))
            })?;

            Ok(ReviewOutcome {
                code,
                internal: body.internal_micros.map(Duration::from_micros),
            })
        })
    }

    fn standings<'a>(&'a self) -> ServiceCall<'a, Vec<BookStanding>> {
        Box::pin(async move {
            let url = format!("{}/standings", self.base_url);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ServiceError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ServiceError::Protocol(format!(
                    "standings returned status {}",
                    response.status()
                )));
            }
            response
                .json::<Vec<BookStanding>>()
                .await
                .map_err(|e| ServiceError::Protocol(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BOOK_NAMES_CSV, INVALID_BOOK_ID};

    fn review(book_id: u32, email: &str) -> Review {
        Review {
            book_id,
            email: email.to_string(),
            review: "GOOD".to_string(),
        }
    }

    #[test]
    fn test_review_code_wire_mapping() {
        assert_eq!(ReviewCode::from_wire(0), Some(ReviewCode::Accepted));
        assert_eq!(ReviewCode::from_wire(1), Some(ReviewCode::InvalidBook));
        assert_eq!(ReviewCode::from_wire(2), Some(ReviewCode::OverLimit));
        assert_eq!(ReviewCode::from_wire(3), None);
    }

    #[tokio::test]
    async fn test_mock_rejects_unknown_books() {
        let service = MockService::new(MockBehavior::Faithful, Duration::ZERO);
        service.initialize(6, BOOK_NAMES_CSV).await.unwrap();

        let outcome = service
            .submit_review(&review(INVALID_BOOK_ID, "A@B.C"), 25)
            .await
            .unwrap();
        assert_eq!(outcome.code, ReviewCode::InvalidBook);

        let outcome = service.submit_review(&review(3, "A@B.C"), 25).await.unwrap();
        assert_eq!(outcome.code, ReviewCode::Accepted);
    }

    #[tokio::test]
    async fn test_mock_enforces_review_cap() {
        let service = MockService::new(MockBehavior::Faithful, Duration::ZERO);
        service.initialize(6, BOOK_NAMES_CSV).await.unwrap();

        let first = service.submit_review(&review(1, "SAME@X.Y"), 1).await.unwrap();
        assert_eq!(first.code, ReviewCode::Accepted);

        let second = service.submit_review(&review(2, "SAME@X.Y"), 1).await.unwrap();
        assert_eq!(second.code, ReviewCode::OverLimit);
    }

    #[tokio::test]
    async fn test_mock_standings_order() {
        let service = MockService::new(MockBehavior::Faithful, Duration::ZERO);
        service.initialize(3, "First, Second, Third").await.unwrap();

        for email in ["A@A.A", "B@B.B", "C@C.C"] {
            service.submit_review(&review(2, email), 25).await.unwrap();
        }
        service.submit_review(&review(1, "D@D.D"), 25).await.unwrap();

        let standings = service.standings().await.unwrap();
        assert_eq!(standings.len(), 3);
        assert_eq!(standings[0].book_name, "Second");
        assert_eq!(standings[0].reviews, 3);
        assert_eq!(standings[1].book_name, "First");
        assert_eq!(standings[2].reviews, 0);
    }

    #[tokio::test]
    async fn test_mock_transport_failure() {
        let service = MockService::new(MockBehavior::FailTransport, Duration::ZERO);
        service.initialize(6, BOOK_NAMES_CSV).await.unwrap();

        let result = service.submit_review(&review(1, "A@B.C"), 25).await;
        assert!(matches!(result, Err(ServiceError::Transport(_))));
    }
}
