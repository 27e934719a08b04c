//! 重试预算：带上限的失败计数器
//!
//! 计数只增不减，贯穿整个进程生命周期；超出上限即致命。
//! 两种上限语义：
//! - `fatal_at(n)`：第 n 次失败即耗尽（传送阶段，默认 10）
//! - `allowing(n)`：允许 n 次，第 n+1 次耗尽（被踢重连，默认 5）

use crate::core::CoffeeError;

/// 重试预算
#[derive(Debug, Clone)]
pub struct RetryBudget {
    name: &'static str,
    used: u32,
    /// 达到该计数即耗尽
    exhausted_at: u32,
    /// 日志中展示的上限
    limit: u32,
}

impl RetryBudget {
    /// 第 `limit` 次失败即耗尽
    pub fn fatal_at(name: &'static str, limit: u32) -> Self {
        Self {
            name,
            used: 0,
            exhausted_at: limit.max(1),
            limit,
        }
    }

    /// 允许 `limit` 次失败，再失败一次即耗尽
    pub fn allowing(name: &'static str, limit: u32) -> Self {
        Self {
            name,
            used: 0,
            exhausted_at: limit.saturating_add(1),
            limit,
        }
    }

    /// 记录一次失败；返回当前是第几次，耗尽时返回错误
    pub fn charge(&mut self) -> Result<u32, CoffeeError> {
        self.used = self.used.saturating_add(1);
        if self.used >= self.exhausted_at {
            return Err(CoffeeError::RetryBudgetExhausted {
                budget: self.name,
                attempts: self.used,
                limit: self.limit,
            });
        }
        Ok(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
