//! Object references and per-kind wire-index rendering.
//!
//! Every addressable entity is identified two ways:
//!
//! - a *reference*: the session-rooted path used by the REST resource
//!   hierarchy (`<owner>/<chassis-ip>/<module>/<port>/...`), where a
//!   child's reference is always its parent's reference plus exactly one
//!   segment;
//! - a *local index*: the wire-level address (`module/port`,
//!   `module/port/stream`, ...) used to build socket command lines.
//!
//! The chassis syntax differs between plain entities (`3/0 P_RESET`) and
//! indexed sub-entities which keep a two-segment prefix and move the
//! remaining segments into a bracket suffix (`3/0 PS_COMMENT [1] "x"`,
//! `3/0 PS_MODIFIER [1,0] ...`). Each kind carries its rendering
//! strategy so backends never string-branch on entity type.

use std::fmt;

mod proptest;

/// Entity type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjKind {
    Session,
    Chassis,
    Module,
    Port,
    Stream,
    Filter,
    Match,
    Length,
    Capture,
    CapPacket,
    Tpld,
    Modifier,
    Xmodifier,
}

/// How a kind renders its wire index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStyle {
    /// `<index> CMD args` (index may be empty for chassis/session).
    Plain,
    /// `module/port CMD [subs] args`; `subs` is the trailing 1 or 2
    /// index segments joined with a comma.
    Bracketed { subs: usize },
}

impl ObjKind {
    /// Rendering strategy for this kind.
    pub fn index_style(self) -> IndexStyle {
        match self {
            ObjKind::Stream
            | ObjKind::Filter
            | ObjKind::Match
            | ObjKind::Length
            | ObjKind::CapPacket
            | ObjKind::Tpld => IndexStyle::Bracketed { subs: 1 },
            ObjKind::Modifier | ObjKind::Xmodifier => IndexStyle::Bracketed { subs: 2 },
            _ => IndexStyle::Plain,
        }
    }

    /// Multi-parameter info/config queries used by `get_attributes`.
    pub fn info_config_commands(self) -> &'static [&'static str] {
        match self {
            ObjKind::Chassis => &["c_info", "c_config"],
            ObjKind::Module => &["m_info", "m_config", "m_portcount"],
            ObjKind::Port => &["p_info", "p_config", "p_receivesync", "ps_indices", "pr_tplds"],
            ObjKind::Stream => &["ps_config"],
            ObjKind::Filter => &["pf_config", "pf_condition"],
            ObjKind::Match => &["pm_config"],
            ObjKind::Length => &["pl_length"],
            ObjKind::Capture => &["pc_fullconfig"],
            ObjKind::CapPacket => &["pc_info"],
            ObjKind::Modifier => &["ps_modifier", "ps_modifierrange"],
            ObjKind::Xmodifier => &["ps_modifierext", "ps_modifierextrange"],
            ObjKind::Session | ObjKind::Tpld => &[],
        }
    }

    /// Command that instantiates an object of this kind on the chassis,
    /// if one exists (modifiers are created via count attributes).
    pub fn create_command(self) -> Option<&'static str> {
        match self {
            ObjKind::Stream => Some("ps_create"),
            ObjKind::Filter => Some("pf_create"),
            ObjKind::Match => Some("pm_create"),
            ObjKind::Length => Some("pl_create"),
            _ => None,
        }
    }
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjKind::Session => "session",
            ObjKind::Chassis => "chassis",
            ObjKind::Module => "module",
            ObjKind::Port => "port",
            ObjKind::Stream => "stream",
            ObjKind::Filter => "filter",
            ObjKind::Match => "match",
            ObjKind::Length => "length",
            ObjKind::Capture => "capture",
            ObjKind::CapPacket => "cappacket",
            ObjKind::Tpld => "tpld",
            ObjKind::Modifier => "modifier",
            ObjKind::Xmodifier => "xmodifier",
        };
        f.write_str(s)
    }
}

/// Wire address of an entity, handed by the object tree to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: ObjKind,
    /// Chassis host the entity lives on (empty for the session root).
    pub chassis: String,
    /// Local wire index, e.g. `3/0` or `3/0/1` (empty for chassis).
    pub index: String,
    /// Session-rooted reference used by the REST hierarchy.
    pub reference: String,
}

impl Target {
    /// Split the index into the plain prefix and the bracket suffix
    /// according to the kind's style.
    fn split_index(&self) -> (String, Option<String>) {
        match self.kind.index_style() {
            IndexStyle::Plain => (self.index.clone(), None),
            IndexStyle::Bracketed { subs } => {
                let segments: Vec<&str> = self.index.split('/').collect();
                let prefix = segments[..segments.len() - subs].join("/");
                let bracket = segments[segments.len() - subs..].join(",");
                (prefix, Some(format!("[{bracket}]")))
            }
        }
    }

    /// Build the full wire command line `"<ref> <command> <args...>"`.
    pub fn build_index_command(&self, command: &str, args: &[&str]) -> String {
        let (prefix, bracket) = self.split_index();
        let mut parts: Vec<&str> = Vec::with_capacity(args.len() + 3);
        if !prefix.is_empty() {
            parts.push(&prefix);
        }
        parts.push(command);
        if let Some(ref b) = bracket {
            parts.push(b);
        }
        parts.extend_from_slice(args);
        parts.join(" ")
    }

    /// Strip the `<ref> <COMMAND>` (and bracket) echo from a
    /// single-line reply, returning the carried value.
    pub fn extract_return(&self, command: &str, reply: &str) -> String {
        let (prefix, bracket) = self.split_index();
        let mut tokens = reply.split_whitespace().peekable();
        if !prefix.is_empty() {
            if tokens.peek().is_some_and(|t| *t == prefix) {
                tokens.next();
            }
        }
        if tokens.peek().is_some_and(|t| t.eq_ignore_ascii_case(command)) {
            tokens.next();
            if let Some(ref b) = bracket {
                if tokens.peek().is_some_and(|t| *t == b.as_str()) {
                    tokens.next();
                }
            }
        }
        tokens.collect::<Vec<_>>().join(" ")
    }

    /// Strip only the reference echo (the rendered index prefix) from a
    /// multi-line reply line, leaving `COMMAND [sub] value...`.
    pub fn strip_index_echo<'a>(&self, line: &'a str) -> &'a str {
        let (prefix, _) = self.split_index();
        if prefix.is_empty() {
            return line.trim_start();
        }
        let trimmed = line.trim_start();
        match trimmed.strip_prefix(prefix.as_str()) {
            Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start(),
            _ => trimmed,
        }
    }

    /// Number of leading tokens to skip after the attribute name in an
    /// echo-stripped config line (the bracket token for sub-entities).
    pub fn value_skip(&self) -> usize {
        match self.kind.index_style() {
            IndexStyle::Plain => 1,
            IndexStyle::Bracketed { .. } => 2,
        }
    }

    /// Numeric id of the entity (last index segment), if any.
    pub fn id(&self) -> Option<u32> {
        self.index.rsplit('/').next()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_target() -> Target {
        Target {
            kind: ObjKind::Port,
            chassis: "10.1.1.1".into(),
            index: "3/0".into(),
            reference: "owner/10.1.1.1/3/0".into(),
        }
    }

    fn stream_target() -> Target {
        Target {
            kind: ObjKind::Stream,
            chassis: "10.1.1.1".into(),
            index: "3/0/1".into(),
            reference: "owner/10.1.1.1/3/0/1".into(),
        }
    }

    fn modifier_target() -> Target {
        Target {
            kind: ObjKind::Modifier,
            chassis: "10.1.1.1".into(),
            index: "3/0/1/0".into(),
            reference: "owner/10.1.1.1/3/0/1/0".into(),
        }
    }

    #[test]
    fn plain_index_command() {
        let t = port_target();
        assert_eq!(t.build_index_command("p_reset", &[]), "3/0 p_reset");
        assert_eq!(
            t.build_index_command("p_capture", &["on"]),
            "3/0 p_capture on"
        );
    }

    #[test]
    fn chassis_index_command_has_no_prefix() {
        let t = Target {
            kind: ObjKind::Chassis,
            chassis: "10.1.1.1".into(),
            index: String::new(),
            reference: "owner/10.1.1.1".into(),
        };
        assert_eq!(
            t.build_index_command("c_logon", &["\"xena\""]),
            "c_logon \"xena\""
        );
    }

    #[test]
    fn bracketed_index_command() {
        let t = stream_target();
        assert_eq!(
            t.build_index_command("ps_comment", &["\"first\""]),
            "3/0 ps_comment [1] \"first\""
        );
        let m = modifier_target();
        assert_eq!(
            m.build_index_command("ps_modifier", &["0", "0xFFFF0000", "INC", "1"]),
            "3/0 ps_modifier [1,0] 0 0xFFFF0000 INC 1"
        );
    }

    #[test]
    fn extract_return_plain() {
        let t = port_target();
        assert_eq!(t.extract_return("p_speed", "3/0 P_SPEED 10000"), "10000");
        // value only, echo already absent
        assert_eq!(t.extract_return("p_speed", "10000"), "10000");
    }

    #[test]
    fn extract_return_bracketed() {
        let t = stream_target();
        assert_eq!(
            t.extract_return("ps_comment", "3/0 PS_COMMENT [1] \"first stream\""),
            "\"first stream\""
        );
        let m = modifier_target();
        assert_eq!(
            m.extract_return("ps_modifier", "3/0 PS_MODIFIER [1,0] 0 0xFFFF0000 INC 1"),
            "0 0xFFFF0000 INC 1"
        );
    }

    #[test]
    fn strip_index_echo_variants() {
        let t = stream_target();
        assert_eq!(
            t.strip_index_echo("3/0  PS_COMMENT [1]  \"first\""),
            "PS_COMMENT [1]  \"first\""
        );
        let p = port_target();
        assert_eq!(p.strip_index_echo("3/0 P_SPEED 10000"), "P_SPEED 10000");
        // a prefix that only shares leading characters is left alone
        assert_eq!(p.strip_index_echo("3/01 P_SPEED 10000"), "3/01 P_SPEED 10000");
    }

    #[test]
    fn target_ids() {
        assert_eq!(stream_target().id(), Some(1));
        assert_eq!(modifier_target().id(), Some(0));
        assert_eq!(
            Target {
                kind: ObjKind::Chassis,
                chassis: "10.1.1.1".into(),
                index: String::new(),
                reference: "owner/10.1.1.1".into(),
            }
            .id(),
            None
        );
    }

    #[test]
    fn styles_by_kind() {
        assert_eq!(ObjKind::Port.index_style(), IndexStyle::Plain);
        assert_eq!(ObjKind::Capture.index_style(), IndexStyle::Plain);
        assert_eq!(ObjKind::Tpld.index_style(), IndexStyle::Bracketed { subs: 1 });
        assert_eq!(
            ObjKind::Xmodifier.index_style(),
            IndexStyle::Bracketed { subs: 2 }
        );
    }
}
