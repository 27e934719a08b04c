//! 聊天行分类器
//!
//! 纯函数：把服务器下发的一行文本映射为语义事件。无状态，可被任意订阅者并发调用。
//! 优先级：定位报告 > 组队邀请 > 「已在目标处」 > 错误 > 其它成功 > 无操作。
//! 「已在目标处」的原文本身包含错误片段 `Try again`，因此需先于错误判断。

use std::sync::OnceLock;

use regex::Regex;

/// 分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedEvent {
    /// 不涉及编排的行
    Unclassified,
    /// 菜单/帮助样板文本，只影响是否记录聊天
    Ignored,
    /// 组队邀请，载荷为队长名
    PartyInvite(String),
    /// 服务器拒绝（限流、维护、踢出、Limbo 等）
    Error,
    Success(SuccessKind),
    /// `/locraw` 返回的定位报告，载荷为地图名
    LocationReport(String),
}

/// 成功事件的细分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessKind {
    /// 进入 SkyBlock（中间层）
    Hub,
    /// 已在大厅
    Lobby,
    /// 已在目标岛屿
    AlreadyThere,
}

pub const IGNORED_MESSAGES: &[&str] = &[
    "HYPIXEL NETWORK",
    "Click to select a help option...",
    "Hypixel Minigames",
    "Found a Server Bug/Issue",
    "Report a Rule Breaker",
    "Store",
    "Support",
    "Allowed Modifications",
    "Hypixel Rules & Policies",
    "General Gameplay/Server",
    "Need more help? Visit our forums",
];

pub const ERROR_MESSAGES: &[&str] = &[
    "There was a problem",
    "Please don't spam",
    "Something went wrong",
    "Cannot join",
    "Error",
    "Try again",
    "You tried to rejoin too fast",
    "A kick ocurred",
    "SkyBlock is currently undergoing emergency maintenance",
    "slow down",
    "You were kicked while joining",
    "A disconnect occurred",
    "You were spawned in Limbo",
];

pub const HUB_WELCOME: &str = "Welcome to Hypixel SkyBlock";

pub const LOBBY_SUCCESS_MESSAGES: &[&str] = &["You are already connected"];

pub const ALREADY_THERE_MESSAGES: &[&str] = &[
    "Couldn't warp you! Try again later. (ALREADY_IN_ISLAND_TYPE)",
    "You are already there",
];

fn location_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""map":"([^"]+)""#).expect("valid location regex"))
}

fn party_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 可选的等级前缀，如 `[MVP+] Name`
    RE.get_or_init(|| {
        Regex::new(r"(?:\[[^\]]+\]\s+)?([A-Za-z0-9_]+) has invited you to join their party!")
            .expect("valid party regex")
    })
}

fn contains_any(line: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| line.contains(n))
}

/// 是否为样板文本（不写入聊天日志）
pub fn is_ignored(line: &str) -> bool {
    contains_any(line, IGNORED_MESSAGES)
}

/// 是否包含错误片段（不考虑优先级）
pub fn has_error_phrase(line: &str) -> bool {
    contains_any(line, ERROR_MESSAGES)
}

/// 对一行文本分类
pub fn classify(line: &str) -> ClassifiedEvent {
    if let Some(caps) = location_regex().captures(line) {
        return ClassifiedEvent::LocationReport(caps[1].to_string());
    }
    if let Some(caps) = party_regex().captures(line) {
        return ClassifiedEvent::PartyInvite(caps[1].to_string());
    }
    if contains_any(line, ALREADY_THERE_MESSAGES) {
        return ClassifiedEvent::Success(SuccessKind::AlreadyThere);
    }
    if has_error_phrase(line) {
        return ClassifiedEvent::Error;
    }
    if line.contains(HUB_WELCOME) {
        return ClassifiedEvent::Success(SuccessKind::Hub);
    }
    if contains_any(line, LOBBY_SUCCESS_MESSAGES) {
        return ClassifiedEvent::Success(SuccessKind::Lobby);
    }
    if is_ignored(line) {
        return ClassifiedEvent::Ignored;
    }
    ClassifiedEvent::Unclassified
}
