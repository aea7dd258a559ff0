use std::fmt;
use std::str::FromStr;

macro_rules! methods {
    ($($variant:ident => $text:literal,)+) => {
        /// Request method. Verbs outside the table are carried verbatim in `Raw`.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum Method {
            $($variant,)+
            Raw(String),
        }

        impl Method {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Method::$variant => $text,)+
                    Method::Raw(raw) => raw,
                }
            }

            /// Maps a wire verb onto the table, falling back to `Raw`.
            pub fn from_wire(text: &str) -> Self {
                match text {
                    $($text => Method::$variant,)+
                    other => Method::Raw(other.to_string()),
                }
            }
        }
    };
}

methods! {
    Get => "GET",
    Put => "PUT",
    Acl => "ACL",
    Head => "HEAD",
    Post => "POST",
    Copy => "COPY",
    Lock => "LOCK",
    Move => "MOVE",
    Bind => "BIND",
    Link => "LINK",
    Patch => "PATCH",
    Trace => "TRACE",
    Mkcol => "MKCOL",
    Merge => "MERGE",
    Purge => "PURGE",
    Notify => "NOTIFY",
    Search => "SEARCH",
    Unlock => "UNLOCK",
    Rebind => "REBIND",
    Unbind => "UNBIND",
    Report => "REPORT",
    Delete => "DELETE",
    Unlink => "UNLINK",
    Connect => "CONNECT",
    MSearch => "M-SEARCH",
    Options => "OPTIONS",
    Propfind => "PROPFIND",
    Checkout => "CHECKOUT",
    Proppatch => "PROPPATCH",
    Subscribe => "SUBSCRIBE",
    Mkcalendar => "MKCALENDAR",
    Mkactivity => "MKACTIVITY",
    Unsubscribe => "UNSUBSCRIBE",
    Source => "SOURCE",
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Method::from_wire(s))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_verbs_round_trip() {
        for verb in ["GET", "POST", "M-SEARCH", "MKCALENDAR", "UNSUBSCRIBE"] {
            let method = Method::from_wire(verb);
            assert!(!matches!(method, Method::Raw(_)), "{verb} should be known");
            assert_eq!(method.as_str(), verb);
        }
    }

    #[test]
    fn unknown_verb_is_preserved() {
        let method: Method = "BREW".parse().unwrap();
        assert_eq!(method, Method::Raw("BREW".to_string()));
        assert_eq!(method.to_string(), "BREW");
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert_eq!(Method::from_wire("get"), Method::Raw("get".to_string()));
    }
}
