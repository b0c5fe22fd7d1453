//! Built-in operator classes hosted by the reference runtime.

use std::collections::HashMap;

pub const MODULE: &str = "extop.builtin";
pub const COMPUTE: &str = "compute";

pub const CODE_INT32: i32 = 5;
pub const CODE_INT64: i32 = 9;
pub const CODE_FLOAT32: i32 = 11;
pub const CODE_FLOAT64: i32 = 12;
pub const CODE_STRING: i32 = 18;

/// Element width for a type code; `None` for strings and unknown codes.
pub fn code_width(code: i32) -> Option<usize> {
    match code {
        0..=2 => Some(1),
        3 | 4 | 23 => Some(2),
        5 | 6 | 11 => Some(4),
        9 | 10 | 12 => Some(8),
        _ => None,
    }
}

/// Input as seen by a class.
pub enum InputData<'a> {
    Bytes(&'a [u8]),
    Strings(Vec<String>),
}

pub struct Input<'a> {
    pub type_code: i32,
    pub dims: Vec<i64>,
    pub data: InputData<'a>,
}

/// Output produced by a class; dropped right after it is handed to the host.
pub struct Output {
    pub bytes: Vec<u8>,
    pub elem_size: usize,
    pub dims: Vec<i64>,
}

pub trait OpClass: Send {
    fn compute(&mut self, inputs: &[Input<'_>], log: &dyn Fn(&str)) -> Result<Vec<Output>, String>;
}

/// Construct `class_name` from module `module`.
pub fn construct(
    module: &str,
    class_name: &str,
    attrs: &HashMap<String, String>,
) -> Result<Box<dyn OpClass>, String> {
    if module != MODULE {
        return Err(format!("no module named '{module}'"));
    }
    match class_name {
        "Doubler" => Ok(Box::new(Doubler)),
        "Identity" => Ok(Box::new(Identity)),
        "Failing" => Ok(Box::new(Failing)),
        "Logging" => Ok(Box::new(Logging)),
        "Scale" => {
            let raw = attrs
                .get("factor")
                .ok_or_else(|| "Scale requires attribute 'factor'".to_string())?;
            let factor = raw
                .parse::<f32>()
                .map_err(|e| format!("Scale: invalid factor '{raw}': {e}"))?;
            Ok(Box::new(Scale { factor }))
        }
        _ => Err(format!("module '{module}' has no class '{class_name}'")),
    }
}

fn fixed<'a>(class: &str, index: usize, input: &Input<'a>) -> Result<&'a [u8], String> {
    match input.data {
        InputData::Bytes(bytes) => Ok(bytes),
        InputData::Strings(_) => Err(format!("{class}: input {index} must be numeric")),
    }
}

fn map_elements<const N: usize>(bytes: &[u8], f: impl Fn([u8; N]) -> [u8; N]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for chunk in bytes.chunks_exact(N) {
        let mut raw = [0u8; N];
        raw.copy_from_slice(chunk);
        out.extend_from_slice(&f(raw));
    }
    out
}

struct Doubler;

impl OpClass for Doubler {
    fn compute(&mut self, inputs: &[Input<'_>], _log: &dyn Fn(&str)) -> Result<Vec<Output>, String> {
        inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let bytes = fixed("Doubler", i, input)?;
                let (doubled, elem_size) = match input.type_code {
                    CODE_FLOAT32 => (
                        map_elements::<4>(bytes, |b| (f32::from_ne_bytes(b) * 2.0).to_ne_bytes()),
                        4,
                    ),
                    CODE_FLOAT64 => (
                        map_elements::<8>(bytes, |b| (f64::from_ne_bytes(b) * 2.0).to_ne_bytes()),
                        8,
                    ),
                    CODE_INT32 => (
                        map_elements::<4>(bytes, |b| {
                            i32::from_ne_bytes(b).wrapping_mul(2).to_ne_bytes()
                        }),
                        4,
                    ),
                    CODE_INT64 => (
                        map_elements::<8>(bytes, |b| {
                            i64::from_ne_bytes(b).wrapping_mul(2).to_ne_bytes()
                        }),
                        8,
                    ),
                    code => return Err(format!("Doubler: unsupported type code {code}")),
                };
                Ok(Output {
                    bytes: doubled,
                    elem_size,
                    dims: input.dims.clone(),
                })
            })
            .collect()
    }
}

struct Scale {
    factor: f32,
}

impl OpClass for Scale {
    fn compute(&mut self, inputs: &[Input<'_>], _log: &dyn Fn(&str)) -> Result<Vec<Output>, String> {
        let factor = self.factor;
        inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                if input.type_code != CODE_FLOAT32 {
                    return Err(format!("Scale: input {i} must be float32"));
                }
                let bytes = fixed("Scale", i, input)?;
                Ok(Output {
                    bytes: map_elements::<4>(bytes, |b| {
                        (f32::from_ne_bytes(b) * factor).to_ne_bytes()
                    }),
                    elem_size: 4,
                    dims: input.dims.clone(),
                })
            })
            .collect()
    }
}

struct Identity;

impl OpClass for Identity {
    fn compute(&mut self, inputs: &[Input<'_>], _log: &dyn Fn(&str)) -> Result<Vec<Output>, String> {
        inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let bytes = fixed("Identity", i, input)?;
                let elem_size = code_width(input.type_code)
                    .ok_or_else(|| format!("Identity: unknown type code {}", input.type_code))?;
                Ok(Output {
                    bytes: bytes.to_vec(),
                    elem_size,
                    dims: input.dims.clone(),
                })
            })
            .collect()
    }
}

struct Failing;

impl OpClass for Failing {
    fn compute(&mut self, _inputs: &[Input<'_>], _log: &dyn Fn(&str)) -> Result<Vec<Output>, String> {
        Err("Failing.compute: deliberate failure".to_string())
    }
}

struct Logging;

impl OpClass for Logging {
    fn compute(&mut self, inputs: &[Input<'_>], log: &dyn Fn(&str)) -> Result<Vec<Output>, String> {
        for (i, input) in inputs.iter().enumerate() {
            match &input.data {
                InputData::Strings(strings) => {
                    log(&format!("input {i}: strings {strings:?}"));
                }
                InputData::Bytes(bytes) => log(&format!(
                    "input {i}: type {} shape {:?} ({} bytes)",
                    input.type_code,
                    input.dims,
                    bytes.len()
                )),
            }
        }
        Ok(Vec::new())
    }
}
