//! Trust classification of the inbound API surface.
//!
//! The rule table below is the single source of truth for trust boundaries.
//! First match wins; anything unlisted requires owner authentication.

/// Proof the gateway demands before forwarding a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// No credentials: health, OTP login flow, scan initiation.
    Public,
    /// A scan-session token travels in the body or `X-Session-Token` header
    /// and is validated by the receiving service, not the gateway.
    SessionToken,
    /// Requires a verified owner JWT.
    OwnerAuth,
}

/// Ordered, segment-anchored prefix rules.
const RULES: &[(&str, RouteClass)] = &[
    ("/api/health", RouteClass::Public),
    ("/api/auth", RouteClass::Public),
    ("/api/scan", RouteClass::Public),
    ("/api/contact", RouteClass::SessionToken),
    ("/api/calls/session", RouteClass::SessionToken),
    ("/api/incidents/report", RouteClass::SessionToken),
];

/// Classify a request path. Unknown paths fail closed to `OwnerAuth`.
#[must_use]
pub fn classify(path: &str) -> RouteClass {
    for (prefix, class) in RULES {
        if prefix_matches(prefix, path) {
            return *class;
        }
    }
    RouteClass::OwnerAuth
}

/// Prefix match anchored on whole path segments, so `/api/scan` never
/// matches `/api/scandalous`.
pub(crate) fn prefix_matches(prefix: &str, path: &str) -> bool {
    let mut prefix_segments = prefix.split('/').filter(|s| !s.is_empty());
    let mut path_segments = path.split('/').filter(|s| !s.is_empty());

    for expected in prefix_segments.by_ref() {
        match path_segments.next() {
            Some(segment) if segment == expected => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_routes() {
        for path in [
            "/api/health",
            "/api/auth/otp/send",
            "/api/auth/otp/verify",
            "/api/scan/validate",
            "/api/scan/session",
        ] {
            assert_eq!(classify(path), RouteClass::Public, "{path}");
        }
    }

    #[test]
    fn session_token_routes() {
        for path in [
            "/api/contact/whatsapp",
            "/api/calls/session/initiate",
            "/api/incidents/report",
        ] {
            assert_eq!(classify(path), RouteClass::SessionToken, "{path}");
        }
    }

    #[test]
    fn owner_routes() {
        for path in [
            "/api/vehicles",
            "/api/vehicles/veh_01",
            "/api/calls/history",
            "/api/incidents",
            "/api/subscriptions/current",
        ] {
            assert_eq!(classify(path), RouteClass::OwnerAuth, "{path}");
        }
    }

    #[test]
    fn unknown_paths_fail_closed() {
        for path in ["/", "/api", "/api/unknown", "/metrics", ""] {
            assert_eq!(classify(path), RouteClass::OwnerAuth, "{path:?}");
        }
    }

    #[test]
    fn matching_is_segment_anchored_not_substring() {
        assert_eq!(classify("/api/scandalous"), RouteClass::OwnerAuth);
        assert_eq!(classify("/api/contacts"), RouteClass::OwnerAuth);
        assert_eq!(classify("/api/calls/sessions"), RouteClass::OwnerAuth);
    }

    #[test]
    fn trailing_slashes_do_not_change_class() {
        assert_eq!(classify("/api/scan/"), RouteClass::Public);
        assert_eq!(classify("/api/contact/"), RouteClass::SessionToken);
    }

    #[test]
    fn every_rule_classifies_itself() {
        for (prefix, class) in RULES {
            assert_eq!(classify(prefix), *class, "{prefix}");
        }
    }
}
