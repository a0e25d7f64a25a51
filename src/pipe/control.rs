//! Control commands.
//!
//! Standard commands are understood by every pipe: when a node kind does
//! not handle one itself, the pipe falls back to generic handling of its
//! link, URI and flow definition. Node kinds define their own commands as
//! [`Control::Local`] opcodes at or above [`LOCAL_BASE`] and decode them
//! into an exhaustive enum of their own.

use super::Pipe;
use crate::error::{Error, Result};
use crate::probe::{FlowDef, Probe};
use std::any::Any;
use std::fmt;

/// First opcode available to node-specific commands.
pub const LOCAL_BASE: u32 = 0x8000;

/// Standard opcode values.
pub mod opcode {
    /// [`Control::GetOutput`](super::Control::GetOutput).
    pub const GET_OUTPUT: u32 = 1;
    /// [`Control::SetOutput`](super::Control::SetOutput).
    pub const SET_OUTPUT: u32 = 2;
    /// [`Control::GetOutputProbe`](super::Control::GetOutputProbe).
    pub const GET_OUTPUT_PROBE: u32 = 3;
    /// [`Control::SetOutputProbe`](super::Control::SetOutputProbe).
    pub const SET_OUTPUT_PROBE: u32 = 4;
    /// [`Control::GetUri`](super::Control::GetUri).
    pub const GET_URI: u32 = 5;
    /// [`Control::SetUri`](super::Control::SetUri).
    pub const SET_URI: u32 = 6;
    /// [`Control::GetFlowDef`](super::Control::GetFlowDef).
    pub const GET_FLOW_DEF: u32 = 7;
    /// [`Control::SetFlowDef`](super::Control::SetFlowDef).
    pub const SET_FLOW_DEF: u32 = 8;
    /// [`Control::Block`](super::Control::Block).
    pub const BLOCK: u32 = 9;
    /// [`Control::Unblock`](super::Control::Unblock).
    pub const UNBLOCK: u32 = 10;
}

/// A control command. Getters fill their slot in place.
pub enum Control<'a> {
    /// Read the downstream pipe.
    GetOutput(Option<Pipe>),
    /// Replace the downstream pipe.
    SetOutput(Option<Pipe>),
    /// Read the probe attached to the output link.
    GetOutputProbe(Option<Probe>),
    /// Replace the probe attached to the output link.
    SetOutputProbe(Option<Probe>),
    /// Read the URI.
    GetUri(Option<String>),
    /// Replace the URI.
    SetUri(Option<String>),
    /// Read the output flow definition.
    GetFlowDef(Option<FlowDef>),
    /// Replace the output flow definition.
    SetFlowDef(FlowDef),
    /// Stop accepting or emitting until unblocked.
    Block,
    /// Lift a previous [`Control::Block`].
    Unblock,
    /// A node-specific command.
    Local {
        /// Opcode at or above [`LOCAL_BASE`].
        opcode: u32,
        /// Arguments and results, typed by the node kind.
        args: &'a mut dyn Any,
    },
}

impl<'a> Control<'a> {
    /// Build a node-specific command.
    pub fn local(opcode: u32, args: &'a mut dyn Any) -> Self {
        Control::Local { opcode, args }
    }

    /// Get the opcode of this command.
    pub fn opcode(&self) -> u32 {
        match self {
            Control::GetOutput(_) => opcode::GET_OUTPUT,
            Control::SetOutput(_) => opcode::SET_OUTPUT,
            Control::GetOutputProbe(_) => opcode::GET_OUTPUT_PROBE,
            Control::SetOutputProbe(_) => opcode::SET_OUTPUT_PROBE,
            Control::GetUri(_) => opcode::GET_URI,
            Control::SetUri(_) => opcode::SET_URI,
            Control::GetFlowDef(_) => opcode::GET_FLOW_DEF,
            Control::SetFlowDef(_) => opcode::SET_FLOW_DEF,
            Control::Block => opcode::BLOCK,
            Control::Unblock => opcode::UNBLOCK,
            Control::Local { opcode, .. } => *opcode,
        }
    }

    /// Check if this is a node-specific command.
    pub fn is_local(&self) -> bool {
        matches!(self, Control::Local { .. })
    }

    /// Get the arguments of a local command as a `T`.
    pub fn local_args<T: 'static>(&mut self) -> Result<&mut T> {
        match self {
            Control::Local { opcode, args } => {
                let opcode = *opcode;
                args.downcast_mut::<T>().ok_or_else(|| {
                    Error::invalid(format!(
                        "opcode {:#x}: arguments are not {}",
                        opcode,
                        std::any::type_name::<T>()
                    ))
                })
            }
            _ => Err(Error::Unhandled),
        }
    }
}

impl fmt::Debug for Control<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Local { opcode, .. } => f
                .debug_struct("Local")
                .field("opcode", &format_args!("{:#x}", opcode))
                .finish_non_exhaustive(),
            Control::SetFlowDef(def) => f.debug_tuple("SetFlowDef").field(def).finish(),
            Control::SetUri(uri) => f.debug_tuple("SetUri").field(uri).finish(),
            other => write!(f, "Control({})", other.opcode()),
        }
    }
}

/// Generic handling of standard commands the node left unhandled.
pub(super) fn fallback(pipe: &Pipe, command: &mut Control<'_>) -> Result<()> {
    match command {
        Control::GetOutput(slot) => *slot = pipe.output_pipe(),
        Control::SetOutput(output) => pipe.set_output(output.take()),
        Control::GetOutputProbe(slot) => *slot = pipe.output_probe(),
        Control::SetOutputProbe(probe) => pipe.set_output_probe(probe.take()),
        Control::GetUri(slot) => *slot = pipe.uri(),
        Control::SetUri(uri) => pipe.set_uri(uri.take()),
        Control::GetFlowDef(slot) => *slot = pipe.flow_def(),
        Control::SetFlowDef(def) => pipe.set_flow_def(def.clone()),
        Control::Block => pipe.close_gate(),
        Control::Unblock => pipe.open_gate()?,
        Control::Local { opcode, .. } if *opcode < LOCAL_BASE => {
            return Err(Error::invalid(format!(
                "opcode {:#x} is below the local range",
                opcode
            )));
        }
        Control::Local { .. } => return Err(Error::Unhandled),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcodes_are_distinct_and_below_local() {
        let mut args = 0u8;
        let commands = [
            Control::GetOutput(None),
            Control::SetOutput(None),
            Control::GetOutputProbe(None),
            Control::SetOutputProbe(None),
            Control::GetUri(None),
            Control::SetUri(None),
            Control::GetFlowDef(None),
            Control::SetFlowDef(FlowDef::new("x.")),
            Control::Block,
            Control::Unblock,
        ];
        let mut seen: Vec<u32> = commands.iter().map(Control::opcode).collect();
        assert!(seen.iter().all(|&op| op < LOCAL_BASE));
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), commands.len());

        let local = Control::local(LOCAL_BASE + 3, &mut args);
        assert_eq!(local.opcode(), LOCAL_BASE + 3);
        assert!(local.is_local());
    }

    #[test]
    fn test_local_args_downcast() {
        let mut count = 7usize;
        let mut command = Control::local(LOCAL_BASE, &mut count);
        *command.local_args::<usize>().unwrap() += 1;
        assert!(command.local_args::<u32>().unwrap_err().is_invalid());
        drop(command);
        assert_eq!(count, 8);

        assert!(Control::Block.local_args::<usize>().unwrap_err().is_unhandled());
    }
}
