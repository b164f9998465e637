//! In-memory `HttpBackend` for tests.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::http::{BackendError, HttpBackend, HttpRequest, ResponseData};

/// Backend that answers from a fixed route table and records every
/// request it receives.
#[derive(Default)]
pub struct MockHttp {
    routes: RefCell<HashMap<String, Result<ResponseData, String>>>,
    requests: RefCell<Vec<HttpRequest>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`.
    pub fn respond(&self, url: &str, response: ResponseData) {
        self.routes
            .borrow_mut()
            .insert(url.to_string(), Ok(response));
    }

    /// Fail `url` with a backend error.
    pub fn fail(&self, url: &str, message: &str) {
        self.routes
            .borrow_mut()
            .insert(url.to_string(), Err(message.to_string()));
    }

    /// Snapshot of every request executed so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }
}

impl HttpBackend for MockHttp {
    fn execute(&self, request: HttpRequest) -> Result<ResponseData, BackendError> {
        let url = request.url.clone();
        self.requests.borrow_mut().push(request);
        match self.routes.borrow().get(&url) {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err(message)) => Err(BackendError(message.clone())),
            None => Err(BackendError(format!("no route for {url}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: "GET".into(),
            url: url.into(),
            headers: vec![],
            body: None,
        }
    }

    #[test]
    fn test_routes_and_recording() {
        let mock = MockHttp::new();
        mock.respond("https://api.test/a", ResponseData::text(200, "ok"));
        mock.fail("https://api.test/b", "boom");

        assert_eq!(mock.execute(get("https://api.test/a")).unwrap().status, 200);
        assert_eq!(
            mock.execute(get("https://api.test/b")).unwrap_err().to_string(),
            "boom"
        );
        assert!(mock
            .execute(get("https://api.test/c"))
            .unwrap_err()
            .to_string()
            .contains("no route"));
        assert_eq!(mock.requests().len(), 3);
    }
}
