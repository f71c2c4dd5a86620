use std::fs;
use std::time::Duration;

use _core::assessment::{
    Assessment, DiscreteReach, ReachAction, RomAction, RomAssessment, RomState, TaskSession,
};
use _core::config::{BatteryConfig, DiscreteReachConfig, RomConfig};
use _core::framing::{encode_frame, FrameDecoder, IN_HEADER};
use _core::ledger::{RowStatus, Task};
use _core::telemetry::{unpack, ControlParams};
use _core::{
    AssessState, Command, DeviceEvent, DeviceSnapshot, EventSource, FullAssessment, Limb,
    Mechanism, OrchestratorEvent, PlutoDevice, Result, RomKind, TaskOutcome,
};

const DT_MS: u64 = 10;

/// Device fed from encoded frames, as the serial link would be.
struct ReplayDevice {
    mechanism: Mechanism,
    decoder: FrameDecoder,
    events: EventSource,
    snapshot: Option<DeviceSnapshot>,
    clock: Duration,
    sent: Vec<Command>,
}

impl ReplayDevice {
    fn new(mechanism: Mechanism) -> Self {
        Self {
            mechanism,
            decoder: FrameDecoder::default(),
            events: EventSource::new(),
            snapshot: None,
            clock: Duration::ZERO,
            sent: Vec::new(),
        }
    }

    /// Encode one stream packet, push it through the decoder, return its events.
    fn packet(&mut self, angle: f32, button: u8) -> Vec<DeviceEvent> {
        let status = 0x01;
        let mut payload = vec![status, 0, 0, self.mechanism.id() << 4];
        for v in [angle, 0.0, 0.0, 0.0, 0.0, 0.0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload.push(button);
        let frame = encode_frame(IN_HEADER, &payload).unwrap();

        self.clock += Duration::from_millis(DT_MS);
        let mut events = Vec::new();
        for payload in self.decoder.push(&frame) {
            let snapshot = unpack(&payload, self.clock).unwrap();
            events.extend(self.events.process(&snapshot));
            self.snapshot = Some(snapshot);
        }
        events
    }
}

impl PlutoDevice for ReplayDevice {
    fn snapshot(&self) -> Option<&DeviceSnapshot> {
        self.snapshot.as_ref()
    }

    fn control_params(&self) -> ControlParams {
        ControlParams::default()
    }

    fn send(&mut self, command: Command) -> Result<()> {
        self.sent.push(command);
        Ok(())
    }
}

fn feed<A: Assessment>(
    session: &mut TaskSession<A>,
    dev: &mut ReplayDevice,
    angle: f32,
    button: u8,
) -> Vec<A::Action> {
    let events = dev.packet(angle, button);
    let mut actions = Vec::new();
    for event in events {
        if let Some(a) = session.handle(event, dev).unwrap() {
            actions.push(a);
        }
    }
    actions
}

/// Press and release the button at `angle`.
fn click<A: Assessment>(
    session: &mut TaskSession<A>,
    dev: &mut ReplayDevice,
    angle: f32,
) -> Vec<A::Action> {
    let mut actions = feed(session, dev, angle, 1);
    actions.extend(feed(session, dev, angle, 0));
    actions
}

fn rest<A: Assessment>(session: &mut TaskSession<A>, dev: &mut ReplayDevice, angle: f32, n: usize) {
    for _ in 0..n {
        feed(session, dev, angle, 0);
    }
}

fn sweep<A: Assessment>(session: &mut TaskSession<A>, dev: &mut ReplayDevice, from: f32, to: f32) {
    let mut angle = from;
    while angle != to {
        angle = if (to - angle).abs() <= 2.0 {
            to
        } else {
            angle + 2.0 * (to - angle).signum()
        };
        feed(session, dev, angle, 0);
    }
}

#[test]
fn arom_then_discrete_reach_through_the_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let battery = BatteryConfig {
        mechanisms: vec!["WFE".into()],
        fixed_tasks: vec!["AROM".into()],
        randomized_tasks: vec!["DISC".into()],
        hoc_only_tasks: vec![],
    };
    let mut fa = FullAssessment::new(dir.path(), battery, Some(5));
    fa.handle(OrchestratorEvent::SubjectSelected("p07".into())).unwrap();
    fa.handle(OrchestratorEvent::LimbSelected(Limb::Left)).unwrap();
    fa.handle(OrchestratorEvent::MechanismSelected(Mechanism::Wfe)).unwrap();
    fa.handle(OrchestratorEvent::CalibrationDone).unwrap();
    fa.handle(OrchestratorEvent::TaskSelected(Task::Arom)).unwrap();
    assert_eq!(fa.state(), AssessState::WaitForAromAssess);

    // AROM, one trial.
    let session_dir = fa.session_dir().unwrap();
    let raw = session_dir.join("arom_raw.csv");
    let summary = session_dir.join("arom_summary.csv");
    let config = RomConfig {
        ntrials: 1,
        window_len: 10,
        ..RomConfig::default()
    };
    let machine = RomAssessment::new(RomKind::Arom, Mechanism::Wfe, config);
    let mut session = TaskSession::with_logs(machine, &raw, &summary).unwrap();
    let mut dev = ReplayDevice::new(Mechanism::Wfe);

    rest(&mut session, &mut dev, 0.0, 12);
    // The press itself does nothing; the release starts the trial.
    let actions = click(&mut session, &mut dev, 0.0);
    assert_eq!(actions, vec![RomAction::TrialStarted { trial: 0, start: 0.0 }]);
    sweep(&mut session, &mut dev, 0.0, -30.0);
    rest(&mut session, &mut dev, -30.0, 12);
    sweep(&mut session, &mut dev, -30.0, 40.0);
    rest(&mut session, &mut dev, 40.0, 12);
    assert_eq!(session.machine().state(), RomState::TrialActiveHolding);
    let actions = click(&mut session, &mut dev, 40.0);
    assert!(matches!(actions[..], [RomAction::TrialRecorded { trial: 1, .. }]));
    let actions = feed(&mut session, &mut dev, 40.0, 0);
    let arom = match actions[..] {
        [RomAction::Done { summary }] => summary,
        ref other => panic!("unexpected actions {other:?}"),
    };
    assert_eq!((arom.min(), arom.max()), (-30.0, 40.0));
    session.close(&mut dev).unwrap();

    let raw_rows = fs::read_to_string(&raw).unwrap().lines().count() - 1;
    assert_eq!(raw_rows, 91);
    let summary_text = fs::read_to_string(&summary).unwrap();
    assert_eq!(summary_text.lines().count(), 2);

    fa.handle(OrchestratorEvent::TaskCompleted(
        TaskOutcome::complete("arom_raw.csv", "arom_summary.csv").with_rom(arom),
    ))
    .unwrap();
    assert_eq!(fa.state(), AssessState::WaitForTaskSelect);
    assert_eq!(fa.mechanism_rom(Mechanism::Wfe).arom(), Some(arom));

    // Discrete reach on the recorded AROM, one round trip.
    fa.handle(OrchestratorEvent::TaskSelected(Task::Disc)).unwrap();
    assert_eq!(fa.state(), AssessState::WaitForDiscAssess);
    let config = DiscreteReachConfig {
        ntrials: 1,
        reach_timeout: 2.0,
        hold_duration: 0.1,
        start_delay: 0.1,
        rest_duration: 0.1,
        ..DiscreteReachConfig::default()
    };
    let disc = DiscreteReach::new(Mechanism::Wfe, arom, config);
    let [t1, t2] = disc.targets();
    let mut session = TaskSession::new(disc);

    click(&mut session, &mut dev, 40.0);
    sweep(&mut session, &mut dev, 40.0, t1);
    rest(&mut session, &mut dev, t1, 30);
    sweep(&mut session, &mut dev, t1, t2);
    rest(&mut session, &mut dev, t2, 30);
    sweep(&mut session, &mut dev, t2, t1);
    let mut actions = Vec::new();
    for _ in 0..60 {
        actions.extend(feed(&mut session, &mut dev, t1, 0));
    }
    assert!(actions
        .iter()
        .any(|a| matches!(a, ReachAction::TrialDone { trial: 0, .. })));
    assert_eq!(actions.last(), Some(&ReachAction::BlockDone));
    assert!(session.machine().is_done());
    session.close(&mut dev).unwrap();

    fa.handle(OrchestratorEvent::TaskCompleted(TaskOutcome::complete("", "")))
        .unwrap();
    assert_eq!(fa.state(), AssessState::MechanismDone);
    fa.handle(OrchestratorEvent::Next).unwrap();
    assert_eq!(fa.state(), AssessState::SubjectLimbDone);

    // Releasing an already idle robot sends nothing.
    assert!(dev.sent.is_empty());

    let ledger = fa.ledger().unwrap();
    assert!(ledger
        .rows()
        .iter()
        .all(|r| r.status == RowStatus::Complete && r.session == Some(1)));
}
