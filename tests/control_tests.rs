//! Integration tests for control dispatch.
//!
//! These tests verify that:
//! - A mismatching signature is rejected as invalid, for every opcode,
//!   before anything about the pipe changes
//! - Standard commands get generic handling when a kind ignores them
//! - Node-specific commands are decoded by their kind only

use pipeflow::elements::{AppSink, AppSinkArgs, NullSink, NullSinkArgs, Relay, RelayCommand};
use pipeflow::pipe::{Control, LOCAL_BASE, Manager, Pipe, PipeKind, PipeState, opcode};
use pipeflow::probe::{FlowDef, LogProbe, Probe};
use pipeflow::pump::{LoopConfig, PumpManager};
use pipeflow::{Buffer, Error, Signature};

fn sink_with_state() -> (Pipe, Pipe) {
    let sink = Manager::<AppSink>::new(())
        .alloc(None, AppSinkArgs::with_bound(1))
        .unwrap();
    let downstream = Manager::<NullSink>::new(())
        .alloc(None, NullSinkArgs::default())
        .unwrap();
    sink.set_output(Some(downstream.clone()));
    sink.set_output_probe(Some(Probe::new(LogProbe::default(), None)));
    sink.set_uri(Some("app://one".into()));
    sink.set_flow_def(FlowDef::new("block.raw."));
    sink.input(Buffer::empty(0), None).unwrap();
    (sink, downstream)
}

/// Every command shape, built fresh for each attempt.
fn command_for(op: u32, scratch: &mut u64) -> Control<'_> {
    match op {
        opcode::GET_OUTPUT => Control::GetOutput(None),
        opcode::SET_OUTPUT => Control::SetOutput(None),
        opcode::GET_OUTPUT_PROBE => Control::GetOutputProbe(None),
        opcode::SET_OUTPUT_PROBE => Control::SetOutputProbe(None),
        opcode::GET_URI => Control::GetUri(None),
        opcode::SET_URI => Control::SetUri(Some("app://other".into())),
        opcode::GET_FLOW_DEF => Control::GetFlowDef(None),
        opcode::SET_FLOW_DEF => Control::SetFlowDef(FlowDef::new("other.")),
        opcode::BLOCK => Control::Block,
        opcode::UNBLOCK => Control::Unblock,
        other => Control::local(other, scratch),
    }
}

#[test]
fn test_signature_mismatch_has_no_side_effects() {
    let (sink, downstream) = sink_with_state();
    let wrong = Signature::new(*b"nope");

    let opcodes = (opcode::GET_OUTPUT..=opcode::UNBLOCK)
        .chain([0, 11, LOCAL_BASE - 1])
        .chain(LOCAL_BASE..LOCAL_BASE + 4)
        .chain([u32::MAX]);

    for op in opcodes {
        let mut scratch = 0u64;
        let mut command = command_for(op, &mut scratch);
        let err = sink.control(wrong, &mut command).unwrap_err();
        assert!(err.is_invalid(), "opcode {:#x}: {:?}", op, err);
        assert!(matches!(
            err,
            Error::SignatureMismatch { expected, actual }
                if expected == AppSink::SIGNATURE && actual == wrong
        ));
        drop(command);
        assert_eq!(scratch, 0);

        assert!(sink.output_pipe().is_some_and(|p| p.ptr_eq(&downstream)));
        assert!(sink.output_probe().is_some());
        assert_eq!(sink.uri().as_deref(), Some("app://one"));
        assert_eq!(sink.flow_def(), Some(FlowDef::new("block.raw.")));
        assert!(!sink.is_blocked());
        assert_eq!(AppSink::len(&sink).unwrap(), 1);
    }
}

#[test]
fn test_generic_handling_of_standard_commands() {
    let (sink, downstream) = sink_with_state();
    let sig = AppSink::SIGNATURE;

    {
        let mut get = Control::GetOutput(None);
        sink.control(sig, &mut get).unwrap();
        assert!(matches!(get, Control::GetOutput(Some(ref p)) if p.ptr_eq(&downstream)));
    }

    let mut get = Control::GetUri(None);
    sink.control(sig, &mut get).unwrap();
    assert!(matches!(get, Control::GetUri(Some(ref uri)) if uri == "app://one"));

    sink.control(sig, &mut Control::SetUri(None)).unwrap();
    assert!(sink.uri().is_none());

    sink.control(sig, &mut Control::Block).unwrap();
    assert!(sink.is_blocked());
    sink.control(sig, &mut Control::Unblock).unwrap();
    assert!(!sink.is_blocked());

    sink.control(sig, &mut Control::SetOutput(None)).unwrap();
    assert!(sink.output_pipe().is_none());
    assert_eq!(downstream.refcount(), 1);
}

#[test]
fn test_generic_block_gates_input() {
    let mgr = PumpManager::new(LoopConfig::default()).unwrap();
    let upstream = mgr.alloc_idle(|_, _| {}).unwrap();
    upstream.start().unwrap();

    let sink = Manager::<NullSink>::new(())
        .alloc(None, NullSinkArgs::default())
        .unwrap();
    sink.control(NullSink::SIGNATURE, &mut Control::Block).unwrap();
    assert_eq!(sink.state(), PipeState::Blocked);

    let err = sink
        .input(Buffer::empty(0), Some(&upstream.to_ref()))
        .unwrap_err();
    assert_eq!(err.into_buffer().map(|b| b.sequence()), Some(0));
    assert!(!upstream.is_started());
    assert_eq!(NullSink::count(&sink).unwrap(), 0);

    sink.control(NullSink::SIGNATURE, &mut Control::Unblock).unwrap();
    assert!(upstream.is_started());
    assert!(!sink.is_blocked());

    sink.input(Buffer::empty(0), Some(&upstream.to_ref())).unwrap();
    assert_eq!(NullSink::count(&sink).unwrap(), 1);
}

#[test]
fn test_local_opcode_below_base_is_invalid() {
    let (sink, _) = sink_with_state();
    let mut scratch = 0u64;
    let err = sink
        .control(AppSink::SIGNATURE, &mut Control::local(3, &mut scratch))
        .unwrap_err();
    assert!(err.is_invalid());
}

#[test]
fn test_unknown_local_opcode_is_unhandled() {
    let (sink, _) = sink_with_state();
    let mut scratch = 0u64;
    let err = sink
        .control(
            AppSink::SIGNATURE,
            &mut Control::local(LOCAL_BASE + 100, &mut scratch),
        )
        .unwrap_err();
    assert!(err.is_unhandled());
}

#[test]
fn test_local_command_with_wrong_arguments() {
    let (sink, _) = sink_with_state();
    let mut wrong = String::new();
    let err = sink
        .control(AppSink::SIGNATURE, &mut Control::local(LOCAL_BASE, &mut wrong))
        .unwrap_err();
    assert!(err.is_invalid());
    // The held buffer was not taken.
    assert_eq!(AppSink::len(&sink).unwrap(), 1);
}

#[test]
fn test_same_opcode_means_different_things_per_kind() {
    // LOCAL_BASE is "resident" for a relay and "count" for a null sink.
    let null = Manager::<NullSink>::new(())
        .alloc(None, NullSinkArgs::default())
        .unwrap();
    null.input(Buffer::empty(0), None).unwrap();

    let mut count = 0u64;
    null.control(
        NullSink::SIGNATURE,
        &mut Control::local(RelayCommand::GetResident.opcode(), &mut count),
    )
    .unwrap();
    assert_eq!(count, 1);

    let mut resident = 0usize;
    let err = null
        .control(
            Relay::SIGNATURE,
            &mut Control::local(RelayCommand::GetResident.opcode(), &mut resident),
        )
        .unwrap_err();
    assert!(err.is_invalid());
}

#[test]
fn test_released_pipe_refuses_control() {
    let sink = Manager::<AppSink>::new(())
        .alloc(None, AppSinkArgs::default())
        .unwrap();
    sink.throw_fatal(&Error::fatal("gone"));
    let err = sink
        .control(AppSink::SIGNATURE, &mut Control::Block)
        .unwrap_err();
    assert!(matches!(err, Error::Released));
}
