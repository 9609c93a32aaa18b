use std::error::Error;
use std::fmt;
use std::io;
use std::str::FromStr;

/// HTTP method used for query round trips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" | "" => Ok(Self::Post),
            other => Err(format!("unsupported http method {other:?}")),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

const TRIVIAL_MESSAGES: &[&str] = &[
    "broken pipe",
    "reset by peer",
    "connection closed before message completed",
    "unexpected eof",
    "unexpected end of file",
];

/// Whether `err` is a connection dropped mid-flight by something between us and the upstream.
///
/// Walks the whole source chain since hyper and reqwest wrap the io error.
pub fn is_trivial_error(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);

    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }

        let message = err.to_string().to_ascii_lowercase();
        if TRIVIAL_MESSAGES.iter().any(|m| message.contains(m)) {
            return true;
        }

        current = err.source();
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("error sending request")
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_http_method() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("POST".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!("".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!("PATCH".parse::<HttpMethod>().is_err());
        assert_eq!(reqwest::Method::from(HttpMethod::Get), reqwest::Method::GET);
        assert_eq!(HttpMethod::default().to_string(), "POST");
    }

    #[test]
    fn test_trivial_errors() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ] {
            let err = Wrapped(io::Error::from(kind));
            assert!(is_trivial_error(&err), "{kind:?}");
        }

        let err = io::Error::other("connection closed before message completed");
        assert!(is_trivial_error(&err));
    }

    #[test]
    fn test_non_trivial_errors() {
        let err = Wrapped(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(!is_trivial_error(&err));

        let err = io::Error::other("dns error: failed to lookup address");
        assert!(!is_trivial_error(&err));
    }
}
