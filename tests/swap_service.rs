mod support;

use alloy_primitives::{B256, U256};
use anyhow::{Context as _, Result};
use escrow_swap_sync::EngineError;
use escrow_swap_sync::chain::events::{ChainEvent, EventRecord};
use escrow_swap_sync::chain::listener::EventDispatcher as _;
use escrow_swap_sync::chain::monitor::{MonitoredTransaction, TransactionKind};
use escrow_swap_sync::chain::service_fee;
use escrow_swap_sync::offer::validation::NewSwapData;
use escrow_swap_sync::p2p::PeerMessage;
use escrow_swap_sync::offer::{ActionState, Direction, OfferAction};
use escrow_swap_sync::swap::{Swap, SwapRole, SwapState};
use uuid::Uuid;

use support::chain::{CHAIN_ID, Sent};
use support::{MAKER, Market, Party, TAKER, key_pair, sepa, tokens};

fn swap_of(party: &Party, id: Uuid) -> Result<Swap> {
    party
        .engine
        .swaps()
        .get_swap(id, CHAIN_ID)?
        .context("swap missing")
}

#[tokio::test]
async fn sell_offer_settles_end_to_end() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.open_offer(Direction::Sell).await?;

    let swap = market
        .taker
        .engine
        .swaps()
        .take_offer(
            id,
            CHAIN_ID,
            NewSwapData {
                taken_swap_amount: tokens(150),
                settlement_method: sepa().with_private_data("IBAN DE22 taker"),
            },
            key_pair(2),
        )
        .await?;
    assert_eq!(swap.state, SwapState::TakeOfferTxBroadcast);
    assert_eq!(swap.role, SwapRole::TakerAndBuyer);
    assert!(swap.requires_fill);
    assert_eq!(swap.taker, TAKER);
    let fee = service_fee(tokens(150), U256::from(100u64));
    assert_eq!(swap.service_fee_amount, fee);
    assert!(market.chain().sent().contains(&Sent::Approve {
        from: TAKER,
        amount: tokens(20) + fee,
    }));

    market.mine_and_sync().await?;

    let maker_swap = swap_of(&market.maker, id)?;
    assert_eq!(maker_swap.role, SwapRole::MakerAndSeller);
    assert_eq!(maker_swap.state, SwapState::AwaitingTakerInformation);
    assert_eq!(maker_swap.maker_private_data.as_deref(), Some("IBAN DE00 maker"));
    assert_eq!(swap_of(&market.taker, id)?.state, SwapState::AwaitingMakerInformation);
    for party in [&market.maker, &market.taker] {
        assert!(party.engine.offers().get_offer(id, CHAIN_ID)?.is_none());
    }

    market.taker.deliver_to(&market.maker).await?;
    let maker_swap = swap_of(&market.maker, id)?;
    assert_eq!(maker_swap.state, SwapState::AwaitingFilling);
    assert_eq!(maker_swap.taker_private_data.as_deref(), Some("IBAN DE22 taker"));

    market.maker.deliver_to(&market.taker).await?;
    let taker_swap = swap_of(&market.taker, id)?;
    assert_eq!(taker_swap.state, SwapState::AwaitingFilling);
    assert_eq!(taker_swap.maker_private_data.as_deref(), Some("IBAN DE00 maker"));

    market.maker.engine.swaps().fill_swap(id, CHAIN_ID).await?;
    let maker_swap = swap_of(&market.maker, id)?;
    assert_eq!(maker_swap.state, SwapState::FillSwapTxBroadcast);
    assert!(!maker_swap.requires_fill);
    assert!(market.chain().sent().ends_with(&[
        Sent::Approve {
            from: MAKER,
            amount: tokens(150),
        },
        Sent::FillSwap(id),
    ]));

    market.mine_and_sync().await?;
    assert_eq!(swap_of(&market.maker, id)?.filling.state, ActionState::Completed);
    for party in [&market.maker, &market.taker] {
        assert_eq!(swap_of(party, id)?.state, SwapState::AwaitingPaymentSent);
    }

    // A duplicate event is a no-op.
    market.chain().emit(ChainEvent::SwapFilled { swap_id: id });
    market.mine_and_sync().await?;
    assert_eq!(swap_of(&market.taker, id)?.state, SwapState::AwaitingPaymentSent);

    market.taker.engine.swaps().report_payment_sent(id, CHAIN_ID).await?;
    assert_eq!(
        swap_of(&market.taker, id)?.state,
        SwapState::ReportPaymentSentTxBroadcast
    );
    market.mine_and_sync().await?;
    for party in [&market.maker, &market.taker] {
        let swap = swap_of(party, id)?;
        assert_eq!(swap.state, SwapState::AwaitingPaymentReceived);
        assert!(swap.is_payment_sent);
    }

    market
        .maker
        .engine
        .swaps()
        .report_payment_received(id, CHAIN_ID)
        .await?;
    market.mine_and_sync().await?;
    for party in [&market.maker, &market.taker] {
        assert_eq!(swap_of(party, id)?.state, SwapState::AwaitingClosing);
    }

    market.taker.engine.swaps().close_swap(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;
    let taker_swap = swap_of(&market.taker, id)?;
    assert_eq!(taker_swap.state, SwapState::Closed);
    assert_eq!(taker_swap.closing.state, ActionState::Completed);
    let maker_swap = swap_of(&market.maker, id)?;
    assert_eq!(maker_swap.state, SwapState::AwaitingClosing);
    assert!(maker_swap.has_buyer_closed);

    market.maker.engine.swaps().close_swap(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;
    let maker_swap = swap_of(&market.maker, id)?;
    assert_eq!(maker_swap.state, SwapState::Closed);
    assert!(maker_swap.has_seller_closed);
    assert_eq!(
        market
            .maker
            .engine
            .truth()
            .swap(id)
            .context("swap missing from truth")?
            .state,
        SwapState::Closed
    );
    Ok(())
}

#[tokio::test]
async fn buy_offer_skips_filling() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.taken_swap(Direction::Buy).await?;

    let maker_swap = swap_of(&market.maker, id)?;
    assert_eq!(maker_swap.role, SwapRole::MakerAndBuyer);
    assert_eq!(maker_swap.state, SwapState::AwaitingPaymentSent);
    let taker_swap = swap_of(&market.taker, id)?;
    assert_eq!(taker_swap.role, SwapRole::TakerAndSeller);
    assert_eq!(taker_swap.state, SwapState::AwaitingPaymentSent);
    assert!(!taker_swap.requires_fill);

    // Taking a Buy offer means selling: the taker escrows the amount too.
    let fee = service_fee(tokens(150), U256::from(100u64));
    assert!(market.chain().sent().contains(&Sent::Approve {
        from: TAKER,
        amount: tokens(150) + tokens(20) + fee,
    }));

    let err = market
        .taker
        .engine
        .swaps()
        .report_payment_sent(id, CHAIN_ID)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Only the Buyer can report sending payment");

    market.maker.engine.swaps().report_payment_sent(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;
    assert_eq!(swap_of(&market.taker, id)?.state, SwapState::AwaitingPaymentReceived);
    Ok(())
}

#[tokio::test]
async fn only_maker_seller_fills() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.taken_swap(Direction::Sell).await?;

    let err = market
        .taker
        .engine
        .swaps()
        .fill_swap(id, CHAIN_ID)
        .await
        .unwrap_err();
    assert!(EngineError::is_validation(&err));
    assert_eq!(err.to_string(), "Only Maker-As-Seller Swaps can be filled");
    let taker_swap = swap_of(&market.taker, id)?;
    assert_eq!(taker_swap.filling.state, ActionState::None);
    assert_eq!(taker_swap.state, SwapState::AwaitingFilling);
    assert!(
        !market
            .chain()
            .sent()
            .iter()
            .any(|sent| matches!(sent, Sent::FillSwap(_)))
    );
    Ok(())
}

#[tokio::test]
async fn reverted_fill_can_be_retried() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.taken_swap(Direction::Sell).await?;

    market.chain().set_revert_writes(true);
    market.maker.engine.swaps().fill_swap(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;

    let maker_swap = swap_of(&market.maker, id)?;
    assert_eq!(maker_swap.state, SwapState::AwaitingFilling);
    assert!(maker_swap.requires_fill);
    assert_eq!(maker_swap.filling.state, ActionState::Exception);

    market.chain().set_revert_writes(false);
    market.maker.engine.swaps().fill_swap(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;
    assert_eq!(swap_of(&market.maker, id)?.state, SwapState::AwaitingPaymentSent);
    Ok(())
}

#[tokio::test]
async fn failed_take_broadcast_marks_taking_failed() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.open_offer(Direction::Sell).await?;

    market.chain().set_reject_writes(true);
    let data = NewSwapData {
        taken_swap_amount: tokens(150),
        settlement_method: sepa().with_private_data("IBAN DE22 taker"),
    };
    market
        .taker
        .engine
        .swaps()
        .take_offer(id, CHAIN_ID, data.clone(), key_pair(2))
        .await
        .unwrap_err();
    let offer = market
        .taker
        .engine
        .offers()
        .get_offer(id, CHAIN_ID)?
        .context("offer missing")?;
    assert_eq!(offer.action(OfferAction::Taking).state, ActionState::Exception);
    assert_eq!(swap_of(&market.taker, id)?.state, SwapState::Taking);

    market.chain().set_reject_writes(false);
    let swap = market
        .taker
        .engine
        .swaps()
        .take_offer(id, CHAIN_ID, data, key_pair(2))
        .await?;
    assert_eq!(swap.state, SwapState::TakeOfferTxBroadcast);
    Ok(())
}

#[tokio::test]
async fn take_rejects_amounts_outside_bounds() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.open_offer(Direction::Sell).await?;

    let err = market
        .taker
        .engine
        .swaps()
        .take_offer(
            id,
            CHAIN_ID,
            NewSwapData {
                taken_swap_amount: tokens(500),
                settlement_method: sepa().with_private_data("IBAN DE22 taker"),
            },
            key_pair(2),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "You must specify a stablecoin amount that is not greater than the maximum amount."
    );
    assert!(market.taker.engine.swaps().get_swap(id, CHAIN_ID)?.is_none());
    Ok(())
}

#[tokio::test]
async fn events_from_another_chain_are_rejected() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.taken_swap(Direction::Buy).await?;

    let other_chain = CHAIN_ID + 1;
    let err = market
        .maker
        .engine
        .dispatch_block(
            other_chain,
            99,
            vec![EventRecord {
                event: ChainEvent::PaymentSent { swap_id: id },
                chain_id: other_chain,
                transaction_hash: B256::ZERO,
            }],
        )
        .await
        .unwrap_err();
    let engine_err = err
        .chain()
        .find_map(|e| e.downcast_ref::<EngineError>())
        .context("no engine error in chain")?;
    assert!(matches!(
        engine_err,
        EngineError::NonmatchingChainId {
            event,
            stored: CHAIN_ID,
            ..
        } if *event == other_chain
    ));
    assert_eq!(swap_of(&market.maker, id)?.state, SwapState::AwaitingPaymentSent);
    Ok(())
}

#[tokio::test]
async fn second_fill_leaves_the_first_in_flight() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.taken_swap(Direction::Sell).await?;
    let swaps = market.maker.engine.swaps().clone();

    swaps.fill_swap(id, CHAIN_ID).await?;
    let err = swaps.fill_swap(id, CHAIN_ID).await.unwrap_err();
    assert_eq!(err.to_string(), "This Swap is already being filled.");

    let maker_swap = swap_of(&market.maker, id)?;
    assert_eq!(maker_swap.state, SwapState::FillSwapTxBroadcast);
    assert_eq!(maker_swap.filling.state, ActionState::AwaitingTransactionConfirmation);
    assert_eq!(maker_swap.filling.error, None);
    let fills = market
        .chain()
        .sent()
        .into_iter()
        .filter(|sent| matches!(sent, Sent::FillSwap(_)))
        .count();
    assert_eq!(fills, 1);

    market.mine_and_sync().await?;
    assert_eq!(swap_of(&market.maker, id)?.filling.state, ActionState::Completed);
    Ok(())
}

#[tokio::test]
async fn late_failure_report_keeps_completed_steps() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.taken_swap(Direction::Sell).await?;

    market.maker.engine.swaps().fill_swap(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;
    let filled = swap_of(&market.maker, id)?;
    assert_eq!(filled.state, SwapState::AwaitingPaymentSent);
    assert_eq!(filled.filling.state, ActionState::Completed);

    for kind in [TransactionKind::ApproveToFill, TransactionKind::FillSwap] {
        market
            .maker
            .engine
            .handle_failed_transaction(
                MonitoredTransaction::new(B256::repeat_byte(0x77), kind, id, CHAIN_ID),
                EngineError::TransactionFailed("transaction expired".into()),
            )
            .await?;
    }
    assert_eq!(swap_of(&market.maker, id)?, filled);

    market.taker.engine.swaps().report_payment_sent(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;
    let reported = swap_of(&market.taker, id)?;
    assert_eq!(reported.reporting_payment_sent.state, ActionState::Completed);
    market
        .taker
        .engine
        .handle_failed_transaction(
            MonitoredTransaction::new(
                B256::repeat_byte(0x78),
                TransactionKind::ReportPaymentSent,
                id,
                CHAIN_ID,
            ),
            EngineError::TransactionFailed("transaction expired".into()),
        )
        .await?;
    assert_eq!(swap_of(&market.taker, id)?, reported);
    Ok(())
}

#[tokio::test]
async fn replayed_swap_events_change_nothing() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.taken_swap(Direction::Sell).await?;
    let swaps = [
        market.maker.engine.swaps().clone(),
        market.taker.engine.swaps().clone(),
    ];

    swaps[0].fill_swap(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;
    swaps[1].report_payment_sent(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;
    swaps[0].report_payment_received(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;
    swaps[1].close_swap(id, CHAIN_ID).await?;
    swaps[0].close_swap(id, CHAIN_ID).await?;
    market.mine_and_sync().await?;

    let before = [swap_of(&market.maker, id)?, swap_of(&market.taker, id)?];
    for swap in &before {
        assert_eq!(swap.state, SwapState::Closed);
    }
    let taker_interface_id = before[1].taker_interface_id.clone();
    for _ in 0..2 {
        market.chain().emit(ChainEvent::OfferTaken {
            offer_id: id,
            taker_interface_id: taker_interface_id.clone(),
        });
        market.chain().emit(ChainEvent::SwapFilled { swap_id: id });
        market.chain().emit(ChainEvent::BuyerClosed { swap_id: id });
        market.chain().emit(ChainEvent::SellerClosed { swap_id: id });
    }
    market.mine_and_sync().await?;

    assert_eq!(swap_of(&market.maker, id)?, before[0]);
    assert_eq!(swap_of(&market.taker, id)?, before[1]);
    for party in [&market.maker, &market.taker] {
        assert!(party.messenger.take().is_empty());
        assert!(party.engine.offers().get_offer(id, CHAIN_ID)?.is_none());
    }
    Ok(())
}

#[tokio::test]
async fn maker_answers_redelivered_taker_information() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.open_offer(Direction::Sell).await?;
    market
        .taker
        .engine
        .swaps()
        .take_offer(
            id,
            CHAIN_ID,
            NewSwapData {
                taken_swap_amount: tokens(150),
                settlement_method: sepa().with_private_data("IBAN DE22 taker"),
            },
            key_pair(2),
        )
        .await?;
    market.mine_and_sync().await?;

    let sent = market.taker.messenger.take();
    let [taker_information @ PeerMessage::TakerInformation(_)] = sent.as_slice() else {
        anyhow::bail!("expected one taker information message, got {sent:?}");
    };

    market.maker.messenger.set_offline(true);
    let err = market
        .maker
        .engine
        .handle_peer_message(taker_information.clone())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("peer transport unavailable"));
    assert_eq!(
        swap_of(&market.maker, id)?.state,
        SwapState::AwaitingMakerInformation
    );

    market.maker.messenger.set_offline(false);
    market
        .maker
        .engine
        .handle_peer_message(taker_information.clone())
        .await?;
    assert_eq!(swap_of(&market.maker, id)?.state, SwapState::AwaitingFilling);

    market.maker.deliver_to(&market.taker).await?;
    let taker_swap = swap_of(&market.taker, id)?;
    assert_eq!(taker_swap.state, SwapState::AwaitingFilling);
    assert_eq!(taker_swap.maker_private_data.as_deref(), Some("IBAN DE00 maker"));
    Ok(())
}

#[tokio::test]
async fn taking_own_offer_marks_nothing() -> Result<()> {
    let mut market = Market::new()?;
    let id = market.open_offer(Direction::Sell).await?;

    let err = market
        .maker
        .engine
        .swaps()
        .take_offer(
            id,
            CHAIN_ID,
            NewSwapData {
                taken_swap_amount: tokens(150),
                settlement_method: sepa().with_private_data("IBAN DE00 maker"),
            },
            key_pair(3),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "You cannot take your own offer.");
    let offer = market
        .maker
        .engine
        .offers()
        .get_offer(id, CHAIN_ID)?
        .context("offer missing")?;
    assert_eq!(offer.action(OfferAction::Taking).state, ActionState::None);
    assert!(market.maker.engine.swaps().get_swap(id, CHAIN_ID)?.is_none());
    Ok(())
}
