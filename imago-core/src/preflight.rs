//! Authorization pre-flight contract.
//!
//! A deployment can hang arbitrary authorization logic (the original system
//! runs embedded scripts here) in front of the expensive pipeline stages.
//! The server only depends on these traits; when no callback is configured
//! the input file is derived from the image root and access is allowed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;

/// Access verdict returned by a pre-flight callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessVerdict {
    Allow,
    /// Allowed, but with a watermark and/or a size restriction applied.
    Restrict,
    Login,
    Clickthrough,
    Kiosk,
    External,
    Deny,
}

impl AccessVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessVerdict::Allow => "allow",
            AccessVerdict::Restrict => "restrict",
            AccessVerdict::Login => "login",
            AccessVerdict::Clickthrough => "clickthrough",
            AccessVerdict::Kiosk => "kiosk",
            AccessVerdict::External => "external",
            AccessVerdict::Deny => "deny",
        }
    }

    /// Verdicts that answer 401 with an IIIF Authentication API `service`
    /// descriptor instead of a bare rejection.
    pub fn wants_auth_service(&self) -> bool {
        matches!(
            self,
            AccessVerdict::Login
                | AccessVerdict::Clickthrough
                | AccessVerdict::Kiosk
                | AccessVerdict::External
        )
    }

    /// IIIF Authentication API v1 profile URI for login-class verdicts.
    pub fn auth_profile(&self) -> Option<&'static str> {
        match self {
            AccessVerdict::Login => Some("http://iiif.io/api/auth/1/login"),
            AccessVerdict::Clickthrough => Some("http://iiif.io/api/auth/1/clickthrough"),
            AccessVerdict::Kiosk => Some("http://iiif.io/api/auth/1/kiosk"),
            AccessVerdict::External => Some("http://iiif.io/api/auth/1/external"),
            _ => None,
        }
    }
}

/// Outcome of a pre-flight call: the verdict plus optional directives.
#[derive(Debug, Clone)]
pub struct PreflightOutcome {
    pub verdict: AccessVerdict,
    /// Override for the input file path.
    pub infile: Option<PathBuf>,
    /// Watermark image applied under a `Restrict` verdict.
    pub watermark: Option<PathBuf>,
    /// Size restriction (an IIIF size string) under a `Restrict` verdict.
    pub size: Option<String>,
    /// IIIF Authentication API URLs for login-class verdicts.
    pub cookie_url: Option<String>,
    pub token_url: Option<String>,
    pub logout_url: Option<String>,
    /// Free-form keys passed through into the `service` descriptor.
    pub extra: BTreeMap<String, String>,
}

impl PreflightOutcome {
    pub fn allow() -> Self {
        Self::with_verdict(AccessVerdict::Allow)
    }

    pub fn deny() -> Self {
        Self::with_verdict(AccessVerdict::Deny)
    }

    pub fn with_verdict(verdict: AccessVerdict) -> Self {
        Self {
            verdict,
            infile: None,
            watermark: None,
            size: None,
            cookie_url: None,
            token_url: None,
            logout_url: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Pre-flight for the image and info endpoints.
pub trait IiifPreflight: Send + Sync {
    fn preflight(
        &self,
        prefix: &str,
        identifier: &str,
        cookie: Option<&str>,
    ) -> Result<PreflightOutcome>;
}

/// Pre-flight for the raw blob endpoint. Only `allow`, `restrict` and
/// `deny` verdicts are meaningful here.
pub trait FilePreflight: Send + Sync {
    fn preflight(&self, infile: &std::path::Path, cookie: Option<&str>) -> Result<PreflightOutcome>;
}

/// A named callback behind the special endpoint, returning exactly one JSON
/// value.
pub trait SpecialFn: Send + Sync {
    fn call(
        &self,
        prefix: &str,
        identifier: &str,
        cookie: Option<&str>,
    ) -> Result<serde_json::Value>;
}

impl<F> IiifPreflight for F
where
    F: Fn(&str, &str, Option<&str>) -> Result<PreflightOutcome> + Send + Sync,
{
    fn preflight(
        &self,
        prefix: &str,
        identifier: &str,
        cookie: Option<&str>,
    ) -> Result<PreflightOutcome> {
        self(prefix, identifier, cookie)
    }
}

impl<F> FilePreflight for F
where
    F: Fn(&std::path::Path, Option<&str>) -> Result<PreflightOutcome> + Send + Sync,
{
    fn preflight(
        &self,
        infile: &std::path::Path,
        cookie: Option<&str>,
    ) -> Result<PreflightOutcome> {
        self(infile, cookie)
    }
}

impl<F> SpecialFn for F
where
    F: Fn(&str, &str, Option<&str>) -> Result<serde_json::Value> + Send + Sync,
{
    fn call(
        &self,
        prefix: &str,
        identifier: &str,
        cookie: Option<&str>,
    ) -> Result<serde_json::Value> {
        self(prefix, identifier, cookie)
    }
}
