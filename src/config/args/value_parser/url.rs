use url::Url;

const INVALID_SCHEME: &str = "endpoint scheme must be https:// or http://";

pub fn check_scheme(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(INVALID_SCHEME.to_string());
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert_eq!(
            check_scheme("http://localhost:9000").unwrap(),
            "http://localhost:9000"
        );
        check_scheme("https://s3.us-east-1.amazonaws.com").unwrap();
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(
            check_scheme("ftp://localhost").unwrap_err(),
            INVALID_SCHEME.to_string()
        );
        assert!(check_scheme("s3://bucket").is_err());
    }

    #[test]
    fn rejects_unparsable_url() {
        assert!(check_scheme("localhost:9000/not a url").is_err());
        assert!(check_scheme("").is_err());
    }
}
