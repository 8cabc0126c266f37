use anyhow::{Result, bail};

use crate::command::{Invocation, sudo};
use crate::ovs::validate_ifname;
use crate::topology::Namespace;

/// Link impairment applied via `tc netem`.
///
/// All fields default to `None`. Omitted parameters are not passed to
/// `tc`; an all-`None` config only clears existing impairment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpairmentConfig {
    pub delay_ms: Option<u32>,
    pub jitter_ms: Option<u32>,
    pub loss_percent: Option<f32>,
    /// Serialization delay only; netem does not enforce it as a cap.
    pub rate_kbit: Option<u64>,
}

impl ImpairmentConfig {
    /// Delay-only link, as used between a host and its switch.
    pub fn delay(delay_ms: u32) -> Self {
        Self {
            delay_ms: Some(delay_ms),
            ..Default::default()
        }
    }

    /// Delayed link with random loss.
    pub fn lossy(delay_ms: u32, loss_percent: f32) -> Self {
        Self {
            delay_ms: Some(delay_ms),
            loss_percent: Some(loss_percent),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delay_ms.is_none() && self.loss_percent.is_none() && self.rate_kbit.is_none()
    }

    /// Loss actually requested, treating an absent or zero value alike.
    pub fn effective_loss(&self) -> f32 {
        self.loss_percent.unwrap_or(0.0)
    }

    pub fn netem_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(delay) = self.delay_ms {
            args.push("delay".into());
            args.push(format!("{delay}ms"));
            if let Some(jitter) = self.jitter_ms
                && jitter > 0
            {
                args.push(format!("{jitter}ms"));
            }
        }
        if let Some(loss) = self.loss_percent
            && loss > 0.0
        {
            args.push("loss".into());
            args.push(format!("{loss}%"));
        }
        if let Some(rate) = self.rate_kbit {
            args.extend(["rate".into(), format!("{rate}kbit")]);
        }

        args
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(loss) = self.loss_percent
            && !(0.0..=100.0).contains(&loss)
        {
            bail!("loss {loss}% outside 0..=100");
        }
        Ok(())
    }
}

/// Apply impairment to `interface`, inside `ns` or in the root namespace.
///
/// Always removes the existing root qdisc first (clean slate), then
/// installs netem as the root qdisc.
pub fn apply_impairment(
    ns: Option<&Namespace>,
    interface: &str,
    config: &ImpairmentConfig,
) -> Result<()> {
    validate_ifname(interface)?;
    config.validate()?;

    let clear = Invocation::new("tc").args(["qdisc", "del", "dev", interface, "root"]);
    let _ = run_tc(ns, &clear);

    if config.is_empty() {
        return Ok(());
    }

    let add = Invocation::new("tc")
        .args(["qdisc", "add", "dev", interface, "root", "netem"])
        .args(config.netem_args());
    let output = run_tc(ns, &add)?;
    if !output.success {
        bail!("apply netem qdisc: {add}\n{}", output.stderr.trim());
    }
    Ok(())
}

fn run_tc(ns: Option<&Namespace>, inv: &Invocation) -> Result<crate::command::CommandOutput> {
    match ns {
        Some(ns) => ns.exec(inv),
        None => sudo(inv),
    }
}
