use crate::check::{CheckResultEvent, Severity, UnknownSeverity};

/// Routes used by applications which don't provide their own.
pub const DEFAULT_ROUTES: &str = "*/warning/*;*/critical/*;*/resolved/*";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("routing specification has no routes")]
    Empty,
    #[error("expected 3 parts in {segment:?}, separated by `/` but {found} found")]
    Parts { segment: String, found: usize },
    #[error("route {segment:?} has an empty {part} pattern")]
    EmptyPattern {
        segment: String,
        part: &'static str,
    },
    #[error("route {segment:?} has an invalid severity")]
    Severity {
        segment: String,
        #[source]
        source: UnknownSeverity,
    },
}

/// Route decides which notifiers receive check results of a given
/// check name and severity. It's written as `check/severity/notifier`,
/// where `check` and `notifier` are glob patterns.
///
/// Ex. `min-healthy/warning/slack`, or `*/critical/*`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Route {
    pub check: String,
    pub severity: Severity,
    pub notifier: String,
}

impl Route {
    /// Returns true if the event's check name and severity match this route.
    pub fn matches(&self, event: &CheckResultEvent) -> bool {
        glob(&self.check, &event.check_name) && self.matches_severity(event.severity)
    }

    pub fn matches_notifier(&self, notifier: &str) -> bool {
        glob(&self.notifier, notifier)
    }

    pub fn matches_severity(&self, severity: Severity) -> bool {
        self.severity == severity
    }
}

impl std::str::FromStr for Route {
    type Err = Error;

    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = segment.split('/').collect();

        let [check, severity, notifier] = parts.as_slice() else {
            return Err(Error::Parts {
                segment: segment.to_string(),
                found: parts.len(),
            });
        };

        for (part, value) in [("check", check), ("severity", severity), ("notifier", notifier)] {
            if value.is_empty() {
                return Err(Error::EmptyPattern {
                    segment: segment.to_string(),
                    part,
                });
            }
        }

        let severity = severity.parse().map_err(|source| Error::Severity {
            segment: segment.to_string(),
            source,
        })?;

        Ok(Route {
            check: check.to_string(),
            severity,
            notifier: notifier.to_string(),
        })
    }
}

/// Parse a `;`-separated routing specification into its Routes,
/// in specification order. Empty segments (as from a trailing `;`)
/// are ignored, but the specification must have at least one route.
pub fn parse(spec: &str) -> Result<Vec<Route>, Error> {
    let routes = spec
        .split(';')
        .filter(|segment| !segment.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Route>, _>>()?;

    if routes.is_empty() {
        return Err(Error::Empty);
    }
    Ok(routes)
}

/// Match `subject` against a glob `pattern`, where `*` matches any
/// (possibly empty) substring and all other characters match literally.
pub fn glob(pattern: &str, subject: &str) -> bool {
    let Some((head, rest)) = pattern.split_once('*') else {
        return pattern == subject;
    };
    let Some(mut subject) = subject.strip_prefix(head) else {
        return false;
    };
    // `rest` may have further wildcards. All but its last component must be
    // found in order, and the last must be a suffix of what remains.
    let (middle, tail) = match rest.rsplit_once('*') {
        Some((middle, tail)) => (Some(middle), tail),
        None => (None, rest),
    };

    for part in middle.into_iter().flat_map(|m| m.split('*')) {
        match subject.find(part) {
            Some(index) => subject = &subject[index + part.len()..],
            None => return false,
        }
    }
    subject.ends_with(tail)
}
