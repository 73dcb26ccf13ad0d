// ── Detection router ──
//
// Per-face decision pipeline. Rejections have no side effects; only an
// admission touches the ledger, the bus, the door and the sinks.

use std::sync::Arc;

use strum::Display;
use tracing::{debug, info, warn};

use crate::catalog::IdentityCatalog;
use crate::door::DoorController;
use crate::ledger::{AttendanceLedger, AttendanceStatus, Presence};
use crate::oracle::{Detection, Identification};
use crate::outbound::{AdmissionEvent, Outbound, admitted_text};
use crate::persistence::PersistenceSink;
use crate::schedule::{ScheduleRegistry, TIMESTAMP_FORMAT};
use crate::telemetry::TelemetrySink;

/// What happened to one detection.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RouteOutcome {
    Admitted { identity: String, course: String },
    /// Unknown face, or a match below the confidence threshold.
    Unrecognized,
    NotInCatalog,
    OutOfSchedule,
    AlreadyAdmitted,
}

impl RouteOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

pub struct DetectionRouter {
    registry: Arc<ScheduleRegistry>,
    ledger: Arc<AttendanceLedger>,
    catalog: Arc<IdentityCatalog>,
    door: DoorController,
    outbound: Outbound,
    telemetry: Arc<dyn TelemetrySink>,
    persistence: Arc<dyn PersistenceSink>,
}

impl DetectionRouter {
    pub fn new(
        registry: Arc<ScheduleRegistry>,
        ledger: Arc<AttendanceLedger>,
        catalog: Arc<IdentityCatalog>,
        door: DoorController,
        outbound: Outbound,
        telemetry: Arc<dyn TelemetrySink>,
        persistence: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            registry,
            ledger,
            catalog,
            door,
            outbound,
            telemetry,
            persistence,
        }
    }

    pub fn route(&self, detection: &Detection) -> RouteOutcome {
        let identity = match &detection.identification {
            Identification::Known(name) if detection.confident => name.as_str(),
            Identification::Known(name) => {
                debug!(identity = %name, "low-confidence match dropped");
                return RouteOutcome::Unrecognized;
            }
            Identification::Unknown => return RouteOutcome::Unrecognized,
        };
        if !self.catalog.contains(identity) {
            warn!(identity, "identity not in catalog, dropped");
            return RouteOutcome::NotInCatalog;
        }

        let course = self.registry.current_course_name();
        let now = detection.at.naive_local();

        if !self.registry.is_admissible_now(identity, now) {
            info!(identity, %course, "detection outside schedule, ignored");
            return RouteOutcome::OutOfSchedule;
        }
        if !self.ledger.try_latch_admission(identity, &course) {
            debug!(identity, %course, "already admitted for this course");
            return RouteOutcome::AlreadyAdmitted;
        }

        self.admit(identity, &course, detection);
        RouteOutcome::Admitted {
            identity: identity.to_owned(),
            course,
        }
    }

    fn admit(&self, identity: &str, course: &str, detection: &Detection) {
        let timestamp = detection.at.format(TIMESTAMP_FORMAT).to_string();
        info!(identity, course, %timestamp, "admitting");

        self.ledger.append_detection(identity, &timestamp);
        self.ledger
            .record_status(identity, AttendanceStatus::present(&timestamp, course));

        let event = AdmissionEvent {
            name: identity.to_owned(),
            timestamp,
            status: Presence::Present.to_string(),
            course: course.to_owned(),
        };
        if let Err(e) = self.outbound.admission(&event) {
            warn!(identity, error = %e, "admission event not published");
        }

        let rows = self.ledger.snapshot_table(&self.catalog);
        if let Err(e) = self.persistence.save(&rows) {
            warn!(error = %e, "attendance table not saved");
        }

        self.door.admit();
        self.telemetry
            .publish_admission(identity, course, detection.at);

        if let Err(e) = self.outbound.display(&admitted_text(identity)) {
            warn!(error = %e, "admission text not published");
        }
        let course_active = self.registry.is_course_active(detection.at.naive_local());
        if let Err(e) = self.outbound.schedule_status(course_active) {
            warn!(error = %e, "schedule status not published");
        }
    }
}
