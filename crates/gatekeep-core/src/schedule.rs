// ── Schedule windows ──
//
// At most two windows matter for an identity: the shared course window and
// an optional per-identity override. Either being active admits.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::info;

use crate::catalog::IdentityCatalog;
use crate::error::CoreError;
use crate::ledger::AttendanceLedger;

/// Course name reported while no course window is set.
pub const NO_SCHEDULE: &str = "Tidak ada jadwal";

/// Wire and table timestamp format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Marker value that removes a window instead of setting one.
const DELETE: &str = "delete";

// ── ScheduleWindow ───────────────────────────────────────────────────

/// A closed interval of local wall-clock time. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl ScheduleWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, CoreError> {
        if end < start {
            return Err(CoreError::malformed(
                "schedule window",
                format!("end {end} is before start {start}"),
            ));
        }
        Ok(Self { start, end })
    }

    /// Parse both bounds from `%Y-%m-%d %H:%M:%S`.
    pub fn parse(start: &str, end: &str) -> Result<Self, CoreError> {
        Self::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// Active iff `t` falls on the start date and inside `[start, end]`.
    pub fn is_active(&self, t: NaiveDateTime) -> bool {
        self.start.date() == t.date() && self.start <= t && t <= self.end
    }
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, CoreError> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| CoreError::malformed("schedule timestamp", format!("{raw:?}: {e}")))
}

// ── ScheduleUpdate ───────────────────────────────────────────────────

/// A decoded message from the schedule topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleUpdate {
    SetCourse {
        course: String,
        window: ScheduleWindow,
    },
    ClearCourse,
    SetIdentity {
        identity: String,
        window: ScheduleWindow,
    },
    /// Clear one identity's window, or all of them when `identity` is `None`.
    ClearIdentity { identity: Option<String> },
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    course: Option<String>,
    person: Option<String>,
    name: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

impl ScheduleUpdate {
    /// Decode a schedule payload.
    ///
    /// Accepted shapes: `{course, start, end}`, `{person, start, end}`,
    /// `{"course": "delete"}` and `{"person": "delete"[, "name": id]}`.
    /// `course` wins when both keys are present.
    pub fn parse(payload: &str) -> Result<Self, CoreError> {
        let raw: RawUpdate = serde_json::from_str(payload)
            .map_err(|e| CoreError::malformed("schedule update", e.to_string()))?;

        if let Some(course) = raw.course {
            if course == DELETE {
                return Ok(Self::ClearCourse);
            }
            let course = course.trim().to_owned();
            if course.is_empty() {
                return Err(CoreError::malformed("schedule update", "empty course name"));
            }
            let window = window_from(raw.start.as_deref(), raw.end.as_deref())?;
            return Ok(Self::SetCourse { course, window });
        }

        if let Some(person) = raw.person {
            if person == DELETE {
                return Ok(Self::ClearIdentity {
                    identity: raw.name.filter(|n| !n.trim().is_empty()),
                });
            }
            let identity = person.trim().to_owned();
            if identity.is_empty() {
                return Err(CoreError::malformed("schedule update", "empty person name"));
            }
            let window = window_from(raw.start.as_deref(), raw.end.as_deref())?;
            return Ok(Self::SetIdentity { identity, window });
        }

        Err(CoreError::malformed(
            "schedule update",
            "expected a `course` or `person` key",
        ))
    }

    /// Encode back into the wire shape.
    pub fn to_payload(&self) -> String {
        let value = match self {
            Self::SetCourse { course, window } => serde_json::json!({
                "course": course,
                "start": window.start.format(TIMESTAMP_FORMAT).to_string(),
                "end": window.end.format(TIMESTAMP_FORMAT).to_string(),
            }),
            Self::ClearCourse => serde_json::json!({ "course": DELETE }),
            Self::SetIdentity { identity, window } => serde_json::json!({
                "person": identity,
                "start": window.start.format(TIMESTAMP_FORMAT).to_string(),
                "end": window.end.format(TIMESTAMP_FORMAT).to_string(),
            }),
            Self::ClearIdentity { identity: None } => serde_json::json!({ "person": DELETE }),
            Self::ClearIdentity {
                identity: Some(name),
            } => serde_json::json!({ "person": DELETE, "name": name }),
        };
        value.to_string()
    }
}

fn window_from(start: Option<&str>, end: Option<&str>) -> Result<ScheduleWindow, CoreError> {
    match (start, end) {
        (Some(start), Some(end)) => ScheduleWindow::parse(start, end),
        _ => Err(CoreError::malformed(
            "schedule update",
            "both `start` and `end` are required",
        )),
    }
}

// ── ScheduleRegistry ─────────────────────────────────────────────────

/// The current course and its window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseWindow {
    pub name: String,
    pub window: ScheduleWindow,
}

#[derive(Debug, Default)]
struct ScheduleState {
    course: Option<CourseWindow>,
    identity_windows: HashMap<String, ScheduleWindow>,
}

/// Course and per-identity windows behind one `RwLock`.
///
/// Assigning a course window opens a new admission epoch: every catalog
/// identity becomes admissible once more under the new course name.
pub struct ScheduleRegistry {
    state: RwLock<ScheduleState>,
    ledger: Arc<AttendanceLedger>,
    catalog: Arc<IdentityCatalog>,
}

impl ScheduleRegistry {
    pub fn new(ledger: Arc<AttendanceLedger>, catalog: Arc<IdentityCatalog>) -> Self {
        Self {
            state: RwLock::new(ScheduleState::default()),
            ledger,
            catalog,
        }
    }

    /// Replace the course window and name, then re-arm admissions.
    pub fn set_course_window(&self, course: &str, window: ScheduleWindow) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let names = self.catalog.names();
        self.ledger
            .reset_epoch(course, names.iter().map(String::as_str));
        if state.course.as_ref().is_some_and(|c| c.name == course) {
            info!(course, "course window reassigned, admissions re-armed");
        }
        state.course = Some(CourseWindow {
            name: course.to_owned(),
            window,
        });
        info!(
            course,
            start = %window.start(),
            end = %window.end(),
            "course window set"
        );
    }

    pub fn clear_course_window(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = state.course.take() {
            info!(course = %previous.name, "course window cleared");
        }
    }

    pub fn set_identity_window(&self, identity: &str, window: ScheduleWindow) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .identity_windows
            .insert(identity.to_owned(), window);
        info!(
            identity,
            start = %window.start(),
            end = %window.end(),
            "identity window set"
        );
    }

    pub fn clear_identity_window(&self, identity: &str) -> bool {
        let removed = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .identity_windows
            .remove(identity)
            .is_some();
        if removed {
            info!(identity, "identity window cleared");
        }
        removed
    }

    pub fn clear_identity_windows(&self) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let count = state.identity_windows.len();
        state.identity_windows.clear();
        info!(count, "all identity windows cleared");
        count
    }

    /// Apply a decoded update from the schedule topic.
    pub fn apply(&self, update: &ScheduleUpdate) {
        match update {
            ScheduleUpdate::SetCourse { course, window } => self.set_course_window(course, *window),
            ScheduleUpdate::ClearCourse => self.clear_course_window(),
            ScheduleUpdate::SetIdentity { identity, window } => {
                self.set_identity_window(identity, *window);
            }
            ScheduleUpdate::ClearIdentity { identity: Some(id) } => {
                self.clear_identity_window(id);
            }
            ScheduleUpdate::ClearIdentity { identity: None } => {
                self.clear_identity_windows();
            }
        }
    }

    /// Decode and apply a raw schedule payload. Malformed payloads leave
    /// the registry untouched.
    pub fn apply_payload(&self, payload: &str) -> Result<ScheduleUpdate, CoreError> {
        let update = ScheduleUpdate::parse(payload)?;
        self.apply(&update);
        Ok(update)
    }

    /// Current course name, or [`NO_SCHEDULE`] when none is set.
    pub fn current_course_name(&self) -> String {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .course
            .as_ref()
            .map_or_else(|| NO_SCHEDULE.to_owned(), |c| c.name.clone())
    }

    pub fn course(&self) -> Option<CourseWindow> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .course
            .clone()
    }

    pub fn identity_window(&self, identity: &str) -> Option<ScheduleWindow> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .identity_windows
            .get(identity)
            .copied()
    }

    /// Whether the course window alone is active at `now`.
    pub fn is_course_active(&self, now: NaiveDateTime) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .course
            .as_ref()
            .is_some_and(|c| c.window.is_active(now))
    }

    pub fn is_admissible_now(&self, identity: &str, now: NaiveDateTime) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let course_ok = state.course.as_ref().is_some_and(|c| c.window.is_active(now));
        let identity_ok = state
            .identity_windows
            .get(identity)
            .is_some_and(|w| w.is_active(now));
        tracing::trace!(identity, course_ok, identity_ok, "schedule check");
        course_ok || identity_ok
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    fn registry(names: &[&str]) -> (ScheduleRegistry, Arc<AttendanceLedger>) {
        let ledger = Arc::new(AttendanceLedger::new());
        let catalog = Arc::new(IdentityCatalog::new(names.iter().copied()));
        (ScheduleRegistry::new(Arc::clone(&ledger), catalog), ledger)
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let w = ScheduleWindow::parse("2024-01-01 09:00:00", "2024-01-01 10:00:00").unwrap();
        assert!(w.is_active(ts("2024-01-01 09:00:00")));
        assert!(w.is_active(ts("2024-01-01 10:00:00")));
        assert!(!w.is_active(ts("2024-01-01 08:59:59")));
        assert!(!w.is_active(ts("2024-01-01 10:00:01")));
    }

    #[test]
    fn window_requires_start_date() {
        let w = ScheduleWindow::parse("2024-01-01 23:00:00", "2024-01-02 01:00:00").unwrap();
        assert!(w.is_active(ts("2024-01-01 23:30:00")));
        // Past midnight the date no longer matches the start date.
        assert!(!w.is_active(ts("2024-01-02 00:30:00")));
    }

    #[test]
    fn window_rejects_inverted_bounds() {
        let err = ScheduleWindow::parse("2024-01-01 10:00:00", "2024-01-01 09:00:00").unwrap_err();
        assert!(matches!(err, CoreError::MalformedInput { .. }));
        assert!(ScheduleWindow::parse("yesterday", "2024-01-01 09:00:00").is_err());
    }

    #[test]
    fn parse_updates() {
        let course = ScheduleUpdate::parse(
            r#"{"course":"Fisika","start":"2024-01-01 09:00:00","end":"2024-01-01 10:00:00"}"#,
        )
        .unwrap();
        assert!(matches!(course, ScheduleUpdate::SetCourse { ref course, .. } if course == "Fisika"));

        assert_eq!(
            ScheduleUpdate::parse(r#"{"course":"delete"}"#).unwrap(),
            ScheduleUpdate::ClearCourse
        );
        assert_eq!(
            ScheduleUpdate::parse(r#"{"person":"delete"}"#).unwrap(),
            ScheduleUpdate::ClearIdentity { identity: None }
        );
        assert_eq!(
            ScheduleUpdate::parse(r#"{"person":"delete","name":"bob"}"#).unwrap(),
            ScheduleUpdate::ClearIdentity {
                identity: Some("bob".into())
            }
        );
    }

    #[test]
    fn parse_rejects_unknown_shapes() {
        for payload in [
            "not json",
            "[]",
            r#"{"room":"A"}"#,
            r#"{"course":"Fisika"}"#,
            r#"{"person":"bob","start":"2024-01-01 09:00:00"}"#,
            r#"{"course":"Fisika","start":"2024-01-01 10:00:00","end":"2024-01-01 09:00:00"}"#,
        ] {
            let err = ScheduleUpdate::parse(payload).unwrap_err();
            assert!(
                matches!(err, CoreError::MalformedInput { .. }),
                "{payload} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn payload_encoding_parses_back() {
        let window = ScheduleWindow::parse("2024-01-01 09:00:00", "2024-01-01 10:00:00").unwrap();
        let update = ScheduleUpdate::SetIdentity {
            identity: "bob".into(),
            window,
        };
        assert_eq!(ScheduleUpdate::parse(&update.to_payload()).unwrap(), update);
    }

    #[test]
    fn course_name_defaults_to_sentinel() {
        let (registry, _) = registry(&["alice"]);
        assert_eq!(registry.current_course_name(), NO_SCHEDULE);

        let window = ScheduleWindow::parse("2024-01-01 09:00:00", "2024-01-01 10:00:00").unwrap();
        registry.set_course_window("Fisika", window);
        assert_eq!(registry.current_course_name(), "Fisika");

        registry.clear_course_window();
        assert_eq!(registry.current_course_name(), NO_SCHEDULE);
    }

    #[test]
    fn either_window_admits() {
        let (registry, _) = registry(&["alice", "bob"]);
        let now = ts("2024-01-01 09:30:00");
        assert!(!registry.is_admissible_now("alice", now));

        let window = ScheduleWindow::parse("2024-01-01 09:00:00", "2024-01-01 10:00:00").unwrap();
        registry.set_identity_window("bob", window);
        assert!(registry.is_admissible_now("bob", now));
        assert!(!registry.is_admissible_now("alice", now));

        registry.set_course_window("Fisika", window);
        assert!(registry.is_admissible_now("alice", now));

        assert!(registry.clear_identity_window("bob"));
        assert!(!registry.clear_identity_window("bob"));
    }

    #[test]
    fn course_assignment_rearms_catalog_latches() {
        let (registry, ledger) = registry(&["alice"]);
        let window = ScheduleWindow::parse("2024-01-01 09:00:00", "2024-01-01 10:00:00").unwrap();

        registry.set_course_window("Fisika", window);
        assert!(ledger.try_latch_admission("alice", "Fisika"));
        assert!(!ledger.try_latch_admission("alice", "Fisika"));

        registry.set_course_window("Fisika", window);
        assert!(ledger.try_latch_admission("alice", "Fisika"));
    }

    #[test]
    fn malformed_payload_keeps_prior_state() {
        let (registry, _) = registry(&["alice"]);
        registry
            .apply_payload(
                r#"{"course":"Fisika","start":"2024-01-01 09:00:00","end":"2024-01-01 10:00:00"}"#,
            )
            .unwrap();

        assert!(registry.apply_payload(r#"{"course":"Kimia","start":"bad","end":"bad"}"#).is_err());
        assert_eq!(registry.current_course_name(), "Fisika");
    }
}
