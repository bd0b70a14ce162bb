//! Four-region indented text builder.
//!
//! Text accumulates in `Header`, `Prefix`, `Body` and `Suffix`, each with
//! its own indentation depth. `finalize` concatenates them in that order,
//! indenting the body one level (it is the body of `def call(args):`),
//! and reports which output lines came from which IR line.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use serde::Serialize;

pub const INDENT: &str = "    ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    Header,
    Prefix,
    Body,
    Suffix,
}

impl Region {
    const ORDER: [Region; 4] = [Region::Header, Region::Prefix, Region::Body, Region::Suffix];

    fn index(self) -> usize {
        match self {
            Region::Header => 0,
            Region::Prefix => 1,
            Region::Body => 2,
            Region::Suffix => 3,
        }
    }
}

#[derive(Default)]
struct RegionBuffer {
    lines: Vec<(String, Option<usize>)>,
    depth: usize,
}

/// Output line → IR line, for lines that have an IR origin.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LineMap {
    entries: Vec<LineMapEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LineMapEntry {
    /// 1-based line in the emitted module.
    pub output_line: usize,
    /// Index into `ProgramIr::lines`.
    pub ir_line: usize,
}

impl LineMap {
    pub fn entries(&self) -> &[LineMapEntry] {
        &self.entries
    }

    pub fn lookup(&self, output_line: usize) -> Option<usize> {
        self.entries
            .binary_search_by_key(&output_line, |e| e.output_line)
            .ok()
            .map(|i| self.entries[i].ir_line)
    }

    /// All output lines produced from one IR line.
    pub fn output_lines_for(&self, ir_line: usize) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|e| e.ir_line == ir_line)
            .map(|e| e.output_line)
            .collect()
    }
}

/// Structured text builder for one generated module.
#[derive(Default)]
pub struct CodeEmitter {
    regions: [RegionBuffer; 4],
    fragments: HashSet<String>,
    origin: Option<usize>,
}

impl CodeEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn region_mut(&mut self, region: Region) -> &mut RegionBuffer {
        &mut self.regions[region.index()]
    }

    /// IR line attributed to subsequently written lines.
    pub fn set_origin(&mut self, origin: Option<usize>) {
        self.origin = origin;
    }

    pub fn depth(&self, region: Region) -> usize {
        self.regions[region.index()].depth
    }

    /// Write one line at the region's current depth.
    pub fn writeline(&mut self, region: Region, line: &str) {
        let origin = self.origin;
        let buf = self.region_mut(region);
        if line.trim().is_empty() {
            buf.lines.push((String::new(), origin));
        } else {
            let text = format!("{}{}", INDENT.repeat(buf.depth), line);
            buf.lines.push((text, origin));
        }
    }

    pub fn writelines<S: AsRef<str>>(&mut self, region: Region, lines: &[S]) {
        for line in lines {
            self.writeline(region, line.as_ref());
        }
    }

    pub fn blank(&mut self, region: Region) {
        self.writeline(region, "");
    }

    /// Append a block of text. The block is dedented to its common
    /// indentation and stripped of leading/trailing blank lines, then each
    /// line is written at the current depth.
    pub fn append(&mut self, region: Region, text: &str) {
        for line in dedent(text) {
            self.writeline(region, &line);
        }
    }

    pub fn push_indent(&mut self, region: Region) {
        self.region_mut(region).depth += 1;
    }

    /// Panics when the region is already at depth zero.
    pub fn pop_indent(&mut self, region: Region) {
        let buf = self.region_mut(region);
        assert!(buf.depth > 0, "indentation underflow in {:?} region", region);
        buf.depth -= 1;
    }

    /// Indent `region` until the returned scope is dropped.
    pub fn scoped_indent(&mut self, region: Region) -> IndentScope<'_> {
        self.push_indent(region);
        IndentScope {
            emitter: self,
            region,
        }
    }

    /// Append `text` to the header the first time `fragment_id` is seen.
    /// Returns whether the fragment was written.
    pub fn write_once(&mut self, fragment_id: &str, text: &str) -> bool {
        if !self.fragments.insert(fragment_id.to_string()) {
            return false;
        }
        if !self.regions[Region::Header.index()].lines.is_empty() {
            self.blank(Region::Header);
        }
        let saved = self.origin.take();
        self.append(Region::Header, text);
        self.origin = saved;
        true
    }

    pub fn has_fragment(&self, fragment_id: &str) -> bool {
        self.fragments.contains(fragment_id)
    }

    /// Current text of a single region, without the body's extra indent.
    pub fn region_text(&self, region: Region) -> String {
        self.regions[region.index()]
            .lines
            .iter()
            .map(|(l, _)| l.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Concatenate all regions into the module text plus its line map.
    pub fn finalize(self) -> (String, LineMap) {
        let mut text = String::new();
        let mut entries = Vec::new();
        let mut line_no = 0;

        for region in Region::ORDER {
            for (line, origin) in &self.regions[region.index()].lines {
                line_no += 1;
                if region == Region::Body && !line.is_empty() {
                    text.push_str(INDENT);
                }
                text.push_str(line);
                text.push('\n');
                if let Some(ir_line) = origin {
                    entries.push(LineMapEntry {
                        output_line: line_no,
                        ir_line: *ir_line,
                    });
                }
            }
        }

        (text, LineMap { entries })
    }
}

/// Indentation held for as long as the scope lives.
pub struct IndentScope<'a> {
    emitter: &'a mut CodeEmitter,
    region: Region,
}

impl Deref for IndentScope<'_> {
    type Target = CodeEmitter;

    fn deref(&self) -> &CodeEmitter {
        self.emitter
    }
}

impl DerefMut for IndentScope<'_> {
    fn deref_mut(&mut self) -> &mut CodeEmitter {
        self.emitter
    }
}

impl Drop for IndentScope<'_> {
    fn drop(&mut self) {
        self.emitter.pop_indent(self.region);
    }
}

/// Remove common leading whitespace and surrounding blank lines.
fn dedent(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return Vec::new();
    };
    let body = &lines[first..=last];

    let margin = body
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    body.iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                l[margin..].trim_end().to_string()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_concatenate_in_order() {
        let mut e = CodeEmitter::new();
        e.writeline(Region::Suffix, "suffix");
        e.writeline(Region::Body, "body");
        e.writeline(Region::Prefix, "def call(args):");
        e.writeline(Region::Header, "import torch");
        let (text, map) = e.finalize();
        assert_eq!(text, "import torch\ndef call(args):\n    body\nsuffix\n");
        assert!(map.entries().is_empty());
    }

    #[test]
    fn test_append_preserves_relative_indentation() {
        let mut e = CodeEmitter::new();
        e.push_indent(Region::Suffix);
        e.append(
            Region::Suffix,
            "
            for k in ks:
                if k:
                    run(k)

            done()
            ",
        );
        assert_eq!(
            e.region_text(Region::Suffix),
            "    for k in ks:\n        if k:\n            run(k)\n\n    done()"
        );
    }

    #[test]
    fn test_scoped_indent_restores_on_drop() {
        let mut e = CodeEmitter::new();
        {
            let mut outer = e.scoped_indent(Region::Body);
            outer.writeline(Region::Body, "a");
            {
                let mut inner = outer.scoped_indent(Region::Body);
                inner.writeline(Region::Body, "b");
                assert_eq!(inner.depth(Region::Body), 2);
            }
            outer.writeline(Region::Body, "c");
        }
        e.writeline(Region::Body, "d");
        assert_eq!(e.depth(Region::Body), 0);
        assert_eq!(e.region_text(Region::Body), "    a\n        b\n    c\nd");
    }

    #[test]
    fn test_scoped_indent_restores_on_early_return() {
        fn fails(e: &mut CodeEmitter) -> Result<(), String> {
            let mut scope = e.scoped_indent(Region::Prefix);
            scope.writeline(Region::Prefix, "x = 1");
            Err("boom".to_string())?;
            scope.writeline(Region::Prefix, "unreachable");
            Ok(())
        }
        let mut e = CodeEmitter::new();
        assert!(fails(&mut e).is_err());
        assert_eq!(e.depth(Region::Prefix), 0);
    }

    #[test]
    #[should_panic(expected = "indentation underflow")]
    fn test_pop_below_zero_panics() {
        let mut e = CodeEmitter::new();
        e.pop_indent(Region::Body);
    }

    #[test]
    fn test_write_once_emits_exactly_once() {
        let mut e = CodeEmitter::new();
        e.writeline(Region::Header, "import torch");
        for _ in 0..3 {
            e.write_once("triton", "import triton");
        }
        assert!(!e.write_once("triton", "import triton"));
        assert!(e.has_fragment("triton"));
        let header = e.region_text(Region::Header);
        assert_eq!(header.matches("import triton").count(), 1);
        assert_eq!(header, "import torch\n\nimport triton");
    }

    #[test]
    fn test_line_map_tracks_origins() {
        let mut e = CodeEmitter::new();
        e.writeline(Region::Header, "import torch");
        e.writeline(Region::Prefix, "def call(args):");
        e.set_origin(Some(4));
        e.writeline(Region::Body, "buf0 = f(x)");
        e.set_origin(Some(5));
        e.writeline(Region::Body, "with torch.xpu._DeviceGuard(0):");
        e.writeline(Region::Body, "    torch.xpu.set_device(0)");
        e.set_origin(None);
        e.writeline(Region::Body, "return (buf0, )");
        let (_, map) = e.finalize();
        assert_eq!(map.lookup(1), None);
        assert_eq!(map.lookup(3), Some(4));
        assert_eq!(map.lookup(4), Some(5));
        assert_eq!(map.lookup(6), None);
        assert_eq!(map.output_lines_for(5), vec![4, 5]);
    }

    #[test]
    fn test_write_once_lines_have_no_origin() {
        let mut e = CodeEmitter::new();
        e.set_origin(Some(2));
        e.write_once("triton", "import triton");
        e.writeline(Region::Body, "stream0 = get_raw_stream(0)");
        let (_, map) = e.finalize();
        assert_eq!(map.entries().len(), 1);
        assert_eq!(map.lookup(2), Some(2));
    }

    #[test]
    fn test_dedent_edge_cases() {
        assert!(dedent("\n   \n").is_empty());
        assert_eq!(dedent("a\n  b"), vec!["a", "  b"]);
        assert_eq!(dedent("\n\t\tx\n\t\ty\n"), vec!["x", "y"]);
    }
}
