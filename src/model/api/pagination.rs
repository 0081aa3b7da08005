use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};
use serde::Serialize;

use crate::error::Error;

const DEFAULT_PAGE_SIZE: u64 = 50;
const MAX_PAGE_SIZE: u64 = 500;

/// Page selection from the `page_num` (1-based) and `page_size` query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page_num: u64,
    page_size: u64,
}

impl Pagination {
    pub fn new(page_num: u64, page_size: u64) -> Result<Self, Error> {
        if page_num == 0 {
            return Err(Error::bad_request("page_num starts at 1"));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(Error::bad_request(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        // Skips are stored as signed 64-bit integers by MongoDB.
        let skip = (page_num - 1).checked_mul(page_size);
        if !matches!(skip, Some(skip) if i64::try_from(skip).is_ok()) {
            return Err(Error::bad_request(format!("page_num {page_num} is too large")));
        }
        Ok(Self {
            page_num,
            page_size,
        })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Number of documents before this page.
    pub fn skip(&self) -> u64 {
        (self.page_num - 1) * self.page_size
    }

    pub fn result<T>(self, items: Vec<T>, total: u64) -> Paginated<T> {
        Paginated {
            items,
            pagination: PaginationResult {
                page_num: self.page_num,
                page_size: self.page_size,
                total,
            },
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Pagination {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let page_num = req.query_value::<u64>("page_num").unwrap_or(Ok(1));
        let page_size = req
            .query_value::<u64>("page_size")
            .unwrap_or(Ok(DEFAULT_PAGE_SIZE));
        let pagination = match (page_num, page_size) {
            (Ok(page_num), Ok(page_size)) => Pagination::new(page_num, page_size),
            _ => Err(Error::bad_request("page_num and page_size must be integers")),
        };
        match pagination {
            Ok(pagination) => request::Outcome::Success(pagination),
            Err(e) => request::Outcome::Failure((Status::BadRequest, e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationResult {
    page_num: u64,
    page_size: u64,
    total: u64,
}

/// One page of results plus the information needed to fetch the others.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    #[serde(flatten)]
    pub pagination: PaginationResult,
}
