use alloy_primitives::{Address, U256};
use anyhow::Result;

use super::{Direction, Offer, OfferState, SettlementMethod};
use crate::chain::service_fee;
use crate::error::EngineError;

/// Offer terms as entered by the user, amounts already in base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOfferData {
    pub stablecoin: Address,
    pub amount_lower_bound: U256,
    pub amount_upper_bound: U256,
    pub security_deposit_amount: U256,
    pub direction: Direction,
    pub settlement_methods: Vec<SettlementMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedNewOfferData {
    pub data: NewOfferData,
    pub service_fee_rate: U256,
    pub service_fee_lower_bound: U256,
    pub service_fee_upper_bound: U256,
}

pub fn validate_new_offer_data(
    data: NewOfferData,
    service_fee_rate: U256,
) -> Result<ValidatedNewOfferData> {
    if data.amount_lower_bound.is_zero() {
        return Err(EngineError::validation(
            "Minimum amount must be greater than zero.",
        ));
    }
    if data.amount_upper_bound < data.amount_lower_bound {
        return Err(EngineError::validation(
            "Maximum amount must not be less than the minimum amount.",
        ));
    }
    if data.security_deposit_amount.saturating_mul(U256::from(10u64)) < data.amount_upper_bound {
        return Err(EngineError::validation(
            "The security deposit amount must be at least 10% of the maximum amount.",
        ));
    }
    let service_fee_lower_bound = service_fee(data.amount_lower_bound, service_fee_rate);
    if !service_fee_rate.is_zero() && service_fee_lower_bound.is_zero() {
        return Err(EngineError::validation(
            "The minimum service fee amount must be greater than zero.",
        ));
    }
    if data.settlement_methods.is_empty() {
        return Err(EngineError::validation(
            "You must specify at least one settlement method.",
        ));
    }
    for method in &data.settlement_methods {
        if method.price.is_empty() {
            return Err(EngineError::validation(
                "You must specify a price for each settlement method you select.",
            ));
        }
        if method.private_data.as_deref().is_none_or(str::is_empty) {
            return Err(EngineError::validation(
                "You must supply your information for each settlement method you select.",
            ));
        }
    }
    let service_fee_upper_bound = service_fee(data.amount_upper_bound, service_fee_rate);
    Ok(ValidatedNewOfferData {
        data,
        service_fee_rate,
        service_fee_lower_bound,
        service_fee_upper_bound,
    })
}

pub fn validate_offer_for_opening(offer: &Offer) -> Result<()> {
    if !offer.is_user_maker {
        return Err(EngineError::validation("You can only open your own offers"));
    }
    if offer.state != OfferState::Opening {
        return Err(EngineError::validation(
            "This Offer cannot currently be opened.",
        ));
    }
    if !offer.opening.state.is_idle() {
        return Err(EngineError::validation(
            "This Offer is already being opened.",
        ));
    }
    Ok(())
}

pub fn validate_offer_for_cancellation(offer: &Offer) -> Result<()> {
    if !offer.is_user_maker {
        return Err(EngineError::validation(
            "You can only cancel your own offers.",
        ));
    }
    if offer.is_taken {
        return Err(EngineError::validation(format!(
            "Offer {} is taken and cannot be canceled.",
            offer.id
        )));
    }
    if !offer.is_created {
        return Err(EngineError::validation(format!(
            "Offer {} is already canceled",
            offer.id
        )));
    }
    if !offer.canceling.state.is_idle() {
        return Err(EngineError::validation(format!(
            "Offer {} is already being canceled.",
            offer.id
        )));
    }
    if offer.state != OfferState::OfferOpened {
        return Err(EngineError::validation(format!(
            "Offer {} cannot currently be canceled.",
            offer.id
        )));
    }
    Ok(())
}

pub fn validate_offer_for_editing(offer: &Offer) -> Result<()> {
    if !offer.is_user_maker {
        return Err(EngineError::validation("You can only edit your own offers."));
    }
    if offer.is_taken {
        return Err(EngineError::validation(format!(
            "Offer {} is already taken.",
            offer.id
        )));
    }
    if !offer.is_created {
        return Err(EngineError::validation(format!(
            "Offer {} is already canceled.",
            offer.id
        )));
    }
    if !offer.editing.state.is_idle() {
        return Err(EngineError::validation(format!(
            "Offer {} is already being edited.",
            offer.id
        )));
    }
    Ok(())
}

/// Replacement settlement methods for an edit.
pub fn validate_edited_settlement_methods(methods: &[SettlementMethod]) -> Result<()> {
    if methods.is_empty() {
        return Err(EngineError::validation(
            "You must specify at least one settlement method.",
        ));
    }
    for method in methods {
        if method.price.is_empty() {
            return Err(EngineError::validation(
                "You must specify a price for each settlement method you select.",
            ));
        }
        if method.private_data.is_none() {
            return Err(EngineError::validation(
                "You must supply your information for each settlement method you select.",
            ));
        }
    }
    Ok(())
}

/// What the taker chose; `settlement_method` carries the taker's own details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSwapData {
    pub taken_swap_amount: U256,
    pub settlement_method: SettlementMethod,
}

pub fn validate_new_swap_data(offer: &Offer, data: &NewSwapData) -> Result<SettlementMethod> {
    if offer.is_user_maker {
        return Err(EngineError::validation("You cannot take your own offer."));
    }
    if !offer.have_public_key {
        return Err(EngineError::validation(
            "The maker's public key has not yet been obtained.",
        ));
    }
    if offer.is_taken || offer.state != OfferState::OfferOpened {
        return Err(EngineError::validation(format!(
            "Offer {} cannot currently be taken.",
            offer.id
        )));
    }
    if !offer.taking.state.is_idle() {
        return Err(EngineError::validation(format!(
            "Offer {} is already being taken.",
            offer.id
        )));
    }
    if offer.amount_lower_bound > data.taken_swap_amount {
        return Err(EngineError::validation(
            "You must specify a stablecoin amount that is not less than the minimum amount.",
        ));
    }
    if offer.amount_upper_bound < data.taken_swap_amount {
        return Err(EngineError::validation(
            "You must specify a stablecoin amount that is not greater than the maximum amount.",
        ));
    }
    offer
        .settlement_methods
        .iter()
        .find(|m| m.same_public_part(&data.settlement_method))
        .cloned()
        .ok_or_else(|| {
            EngineError::validation("The user does not use the settlement method you selected.")
        })
}
