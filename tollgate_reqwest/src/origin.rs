use std::fmt;

use predicates::{reflection, Predicate};
use reqwest::{Request, Url};

/// Only attach an access token to requests sent to the given origin
///
/// Scheme, host and port must all match, so tokens issued by one server
/// are not leaked to another.
#[derive(Clone, Debug)]
pub struct SameOrigin {
    origin: url::Origin,
}

impl SameOrigin {
    /// Matches requests sent to the origin of `url`
    pub fn new(url: &Url) -> Self {
        Self {
            origin: url.origin(),
        }
    }
}

impl Predicate<Request> for SameOrigin {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().origin() == self.origin
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case<'_>> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "origin",
                    req.url().origin().ascii_serialization(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for SameOrigin {}

impl fmt::Display for SameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("origin == ")?;
        f.write_str(&self.origin.ascii_serialization())
    }
}
