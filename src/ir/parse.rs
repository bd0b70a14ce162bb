//! `.wir` text front end.
//!
//! One statement per line, `#` comments, no continuation lines. Errors are
//! collected for every bad line rather than stopping at the first one.

use super::*;
use crate::diagnostic::Diagnostic;

const STATEMENTS: &str = "graph, hint, input, const, buffer, call, launch, guard, endguard, raw, output";

/// Parse a `.wir` source into a program.
pub fn parse_program(source: &str) -> Result<ProgramIr, Vec<Diagnostic>> {
    let mut ir = ProgramIr::new();
    let mut errors = Vec::new();
    let mut offset = 0usize;

    for raw_line in source.split_inclusive('\n') {
        let start = offset;
        offset += raw_line.len();

        let line = raw_line.trim_end_matches(|c| c == '\n' || c == '\r');
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let lead = line.len() - line.trim_start().len();
        let span = Span::new((start + lead) as u32, (start + lead + trimmed.len()) as u32);

        if let Err(message) = parse_statement(trimmed, span, &mut ir) {
            errors.push(Diagnostic::error(message, span));
        }
    }

    if errors.is_empty() {
        Ok(ir)
    } else {
        Err(errors)
    }
}

fn parse_statement(text: &str, span: Span, ir: &mut ProgramIr) -> Result<(), String> {
    let (keyword, rest) = text
        .split_once(char::is_whitespace)
        .map(|(k, r)| (k, r.trim()))
        .unwrap_or((text, ""));

    match keyword {
        "graph" => {
            ir.graph_id = rest
                .parse()
                .map_err(|_| format!("invalid graph id '{}'", rest))?;
        }
        "hint" => {
            let (sym, value) = rest
                .split_once('=')
                .ok_or_else(|| "expected 'hint <symbol> = <value>'".to_string())?;
            let sym = expect_name(sym.trim())?;
            let value = value.trim();
            let value: i64 = value
                .parse()
                .map_err(|_| format!("invalid size hint '{}'", value))?;
            ir.size_hints.insert(sym.to_string(), value);
        }
        "input" | "const" | "buffer" => {
            let (name, ty) = rest
                .split_once(':')
                .ok_or_else(|| format!("expected '{} <name>: <type>'", keyword))?;
            let name = expect_name(name.trim())?.to_string();
            let ty = ty.trim();
            let line = match keyword {
                "input" if ty == "sym" => Line::InputDecl(GraphInput {
                    name,
                    kind: InputKind::Symbolic,
                }),
                "input" => Line::InputDecl(GraphInput {
                    name,
                    kind: InputKind::Tensor(parse_tensor(ty)?),
                }),
                "const" => Line::ConstantDecl(ConstantDecl {
                    name,
                    meta: parse_tensor(ty)?,
                }),
                _ => Line::BufferDecl(BufferDecl {
                    name,
                    meta: parse_tensor(ty)?,
                }),
            };
            ir.push_spanned(line, span);
        }
        "call" => {
            let (result, expr) = match rest.split_once('=') {
                Some((lhs, rhs)) if !rhs.starts_with('=') && is_value_name(lhs.trim()) => {
                    (Some(lhs.trim().to_string()), rhs.trim())
                }
                _ => (None, rest),
            };
            let (target, args, tail) = parse_invocation(expr)?;
            if !tail.is_empty() {
                return Err(format!("unexpected '{}' after call", tail));
            }
            ir.push_spanned(
                Line::KernelCall(KernelCall {
                    target,
                    args,
                    result,
                    launch: Launch::Extern,
                }),
                span,
            );
        }
        "launch" => {
            let (target, args, tail) = parse_invocation(rest)?;
            let grid = tail
                .strip_prefix("grid")
                .ok_or_else(|| "expected 'grid [<dims>]' after launch arguments".to_string())?;
            let grid = parse_dim_list(grid.trim())?;
            if grid.is_empty() {
                return Err("launch grid must have at least one dimension".to_string());
            }
            ir.push_spanned(
                Line::KernelCall(KernelCall {
                    target,
                    args,
                    result: None,
                    launch: Launch::Device { grid },
                }),
                span,
            );
        }
        "guard" => {
            let device_index = rest
                .parse()
                .map_err(|_| format!("invalid device index '{}'", rest))?;
            ir.push_spanned(Line::DeviceGuardEnter { device_index }, span);
        }
        "endguard" => {
            if !rest.is_empty() {
                return Err("'endguard' takes no arguments".to_string());
            }
            ir.push_spanned(Line::DeviceGuardExit, span);
        }
        "raw" => {
            if rest.is_empty() {
                return Err("'raw' needs a statement".to_string());
            }
            ir.push_spanned(
                Line::RawStatement {
                    text: rest.to_string(),
                },
                span,
            );
        }
        "output" => {
            for name in rest.split(',') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                if !is_value_name(name) && name.parse::<i64>().is_err() {
                    return Err(format!("invalid output '{}'", name));
                }
                ir.outputs.push(name.to_string());
            }
        }
        other => {
            return Err(format!(
                "unknown statement '{}' (expected one of: {})",
                other, STATEMENTS
            ))
        }
    }
    Ok(())
}

fn expect_name(s: &str) -> Result<&str, String> {
    if is_value_name(s) {
        Ok(s)
    } else {
        Err(format!("'{}' is not a valid name", s))
    }
}

/// `target(args)` followed by anything; returns the trailing text trimmed.
fn parse_invocation(s: &str) -> Result<(String, Vec<String>, &str), String> {
    let open = s
        .find('(')
        .ok_or_else(|| format!("expected '(' in '{}'", s))?;
    let target = s[..open].trim();
    if target.is_empty()
        || !target
            .split('.')
            .all(|part| is_value_name(part))
    {
        return Err(format!("invalid kernel target '{}'", target));
    }

    let mut depth = 0usize;
    let mut close = None;
    for (i, c) in s[open..].char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close.ok_or_else(|| format!("unclosed '(' in '{}'", s))?;
    let args = split_top_level(&s[open + 1..close]);
    Ok((target.to_string(), args, s[close + 1..].trim()))
}

/// Split on commas that are not nested inside brackets.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// `<dtype>[<dims>] [stride [<dims>]] @ <device>`
fn parse_tensor(s: &str) -> Result<TensorMeta, String> {
    let (layout, device) = s
        .rsplit_once('@')
        .ok_or_else(|| format!("expected '@ <device>' in '{}'", s))?;
    let device_str = device.trim();
    let device =
        Device::parse(device_str).ok_or_else(|| format!("unknown device '{}'", device_str))?;

    let layout = layout.trim();
    let open = layout
        .find('[')
        .ok_or_else(|| format!("expected '<dtype>[<dims>]', found '{}'", layout))?;
    let dtype_str = layout[..open].trim();
    let dtype = Dtype::parse(dtype_str).ok_or_else(|| format!("unknown dtype '{}'", dtype_str))?;

    let close = layout[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| "unclosed '[' in shape".to_string())?;
    let size = parse_dim_list(&layout[open..=close])?;

    let rest = layout[close + 1..].trim();
    let stride = if rest.is_empty() {
        if size.iter().skip(1).any(|d| d.symbol().is_some()) {
            return Err(
                "an explicit stride is required when an inner dimension is symbolic".to_string(),
            );
        }
        contiguous_strides(&size).ok_or_else(|| format!("shape {} is too large", layout))?
    } else {
        let dims = rest
            .strip_prefix("stride")
            .ok_or_else(|| format!("expected 'stride [<dims>]', found '{}'", rest))?;
        let stride = parse_dim_list(dims.trim())?;
        if stride.len() != size.len() {
            return Err(format!(
                "stride has {} dims but shape has {}",
                stride.len(),
                size.len()
            ));
        }
        stride
    };

    let meta = TensorMeta {
        size,
        stride,
        device,
        dtype,
    };
    if meta.is_static() && meta.storage_bytes().is_none() {
        return Err(format!("shape {} is too large", layout));
    }
    Ok(meta)
}

/// `[4, s0, 8]` → dims.
fn parse_dim_list(s: &str) -> Result<Vec<SizeExpr>, String> {
    let inner = s
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| format!("expected '[<dims>]', found '{}'", s))?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| {
            if let Ok(v) = d.parse::<i64>() {
                if v < 0 {
                    return Err(format!("negative dimension '{}'", d));
                }
                Ok(SizeExpr::Int(v))
            } else if is_value_name(d) {
                Ok(SizeExpr::Sym(d.to_string()))
            } else {
                Err(format!("invalid dimension '{}'", d))
            }
        })
        .collect()
}
