//! Compact per-function debug stream.
//!
//! A sequence of bytes with a 4-bit tag in the high nibble and a 4-bit
//! payload in the low nibble. The runtime unwinder walks the stream in
//! lockstep with the IR index to recover branch targets and the
//! `ir_position -> (file, line)` mapping for diagnostics.

use nvc_jit::ir::{JitFunc, JitOp, JitValue};
use nvc_jit::Jit;

const DC_TRAP: u8 = 0;
const DC_LONG_TRAP: u8 = 1;
const DC_TARGET: u8 = 2;
const DC_FILE: u8 = 3;
const DC_LOCINFO: u8 = 4;
const DC_LONG_LOCINFO: u8 = 5;
const DC_STOP: u8 = 6;

/// Encode the debug stream for one function.
///
/// Runs of instructions that are neither branch targets nor DEBUG markers
/// compress into `TRAP` bytes; the filename is emitted once, on the first
/// DEBUG instruction.
pub fn encode(func: &JitFunc, jit: &Jit) -> Vec<u8> {
    let mut enc = Vec::with_capacity(func.irbuf.len().min(1024) + 4);
    let mut run: u32 = 0;
    let mut lineno: u32 = 0;
    let mut file_emitted = false;

    let flush_run = |enc: &mut Vec<u8>, run: u32| {
        if run == 0 {
            return;
        }
        if run < 16 {
            enc.push((DC_TRAP << 4) | run as u8);
        } else {
            assert!(run <= u32::from(u16::MAX));
            enc.push(DC_LONG_TRAP << 4);
            enc.push((run & 0xff) as u8);
            enc.push(((run >> 8) & 0xff) as u8);
        }
    };

    for (i, ir) in func.irbuf.iter().enumerate() {
        if (ir.target || ir.op == JitOp::Debug) && run > 0 {
            flush_run(&mut enc, run);
            run = 0;
        }

        if ir.target {
            enc.push(DC_TARGET << 4);
        }

        if ir.op == JitOp::Debug {
            let (file, line) = match ir.arg1 {
                JitValue::Loc { file, line } => (file, line),
                other => panic!(
                    "{}: DEBUG at {i} carries operand {other:?}",
                    func.name
                ),
            };

            if !file_emitted {
                file_emitted = true;
                lineno = 0;
                let name = jit.file_name(file);
                let len2 = (name.len() as u32 + 1).ilog2() as u8;
                assert!(len2 < 16);
                enc.push((DC_FILE << 4) | len2);
                enc.extend_from_slice(name.as_bytes());
                enc.push(0);
            }

            let delta = line as i64 - i64::from(lineno);
            if (0..16).contains(&delta) {
                enc.push((DC_LOCINFO << 4) | delta as u8);
            } else {
                assert!(line <= u32::from(u16::MAX));
                enc.push(DC_LONG_LOCINFO << 4);
                enc.push((line & 0xff) as u8);
                enc.push(((line >> 8) & 0xff) as u8);
            }
            lineno = line;
        } else {
            run += 1;
        }
    }

    flush_run(&mut enc, run);
    enc.push(DC_STOP << 4);
    enc
}

/// The decoded view of a debug stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LineMap {
    /// IR indices marked as branch targets.
    pub targets: Vec<u32>,
    /// `(ir index, file, line)` for each DEBUG marker, in IR order.
    pub locs: Vec<(u32, String, u32)>,
}

impl LineMap {
    /// Decode a stream produced by [`encode`].
    pub fn decode(bytes: &[u8]) -> LineMap {
        let mut map = LineMap::default();
        let mut pos: u32 = 0;
        let mut line: u32 = 0;
        let mut file = String::new();

        let mut i = 0;
        loop {
            let byte = bytes[i];
            let (tag, payload) = (byte >> 4, byte & 0xf);
            match tag {
                DC_TRAP => {
                    pos += u32::from(payload);
                    i += 1;
                }
                DC_LONG_TRAP => {
                    pos += u32::from(u16::from_le_bytes([bytes[i + 1], bytes[i + 2]]));
                    i += 3;
                }
                DC_TARGET => {
                    map.targets.push(pos);
                    i += 1;
                }
                DC_FILE => {
                    let name_start = i + 1;
                    let name_end = name_start
                        + bytes[name_start..]
                            .iter()
                            .position(|&b| b == 0)
                            .expect("unterminated filename in debug stream");
                    file = String::from_utf8_lossy(&bytes[name_start..name_end]).into_owned();
                    line = 0;
                    i = name_end + 1;
                }
                DC_LOCINFO => {
                    line += u32::from(payload);
                    map.locs.push((pos, file.clone(), line));
                    pos += 1;
                    i += 1;
                }
                DC_LONG_LOCINFO => {
                    line = u32::from(u16::from_le_bytes([bytes[i + 1], bytes[i + 2]]));
                    map.locs.push((pos, file.clone(), line));
                    pos += 1;
                    i += 3;
                }
                DC_STOP => return map,
                other => panic!("corrupt debug stream: tag {other}"),
            }
        }
    }

    /// The last source location at or before `ir_position`, if any.
    pub fn loc_for(&self, ir_position: u32) -> Option<(&str, u32)> {
        self.locs
            .iter()
            .take_while(|(pos, _, _)| *pos <= ir_position)
            .last()
            .map(|(_, file, line)| (file.as_str(), *line))
    }
}
