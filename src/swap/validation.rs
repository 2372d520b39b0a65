use anyhow::Result;

use super::{Swap, SwapRole, SwapState};
use crate::error::EngineError;

pub fn validate_swap_for_filling(swap: &Swap) -> Result<()> {
    if !swap.filling.state.is_idle() {
        return Err(EngineError::validation("This Swap is already being filled."));
    }
    if swap.role != SwapRole::MakerAndSeller {
        return Err(EngineError::validation(
            "Only Maker-As-Seller Swaps can be filled",
        ));
    }
    if swap.state != SwapState::AwaitingFilling {
        return Err(EngineError::validation(
            "This Swap cannot currently be filled",
        ));
    }
    Ok(())
}

pub fn validate_swap_for_reporting_payment_sent(swap: &Swap) -> Result<()> {
    if !swap.reporting_payment_sent.state.is_idle() {
        return Err(EngineError::validation(
            "Payment sending is already being reported this swap.",
        ));
    }
    if !swap.role.is_buyer() {
        return Err(EngineError::validation(
            "Only the Buyer can report sending payment",
        ));
    }
    if swap.state != SwapState::AwaitingPaymentSent {
        return Err(EngineError::validation(
            "Payment sending cannot currently be reported for this swap.",
        ));
    }
    Ok(())
}

pub fn validate_swap_for_reporting_payment_received(swap: &Swap) -> Result<()> {
    if !swap.reporting_payment_received.state.is_idle() {
        return Err(EngineError::validation(
            "Payment receiving is already being reported this swap.",
        ));
    }
    if swap.role.is_buyer() {
        return Err(EngineError::validation(
            "Only the Seller can report receiving payment",
        ));
    }
    if swap.state != SwapState::AwaitingPaymentReceived {
        return Err(EngineError::validation(
            "Payment receiving cannot currently be reported for this swap.",
        ));
    }
    Ok(())
}

pub fn validate_swap_for_closing(swap: &Swap) -> Result<()> {
    if !swap.closing.state.is_idle() {
        return Err(EngineError::validation("This Swap is already being closed."));
    }
    if swap.state != SwapState::AwaitingClosing {
        return Err(EngineError::validation(
            "This Swap cannot currently be closed.",
        ));
    }
    Ok(())
}
