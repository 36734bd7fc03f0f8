//! Subcommand implementations.

use std::sync::Arc;

use miette::Result;
use raithamitra_recovery::{
    MigrationReport, PasscodeLogin, PhoneNumber, ReconcileOutcome, Reconciler, RecoveryConfig,
    TerminalState,
};
use raithamitra_store::{Identity, Role, VerificationSession};
use serde::Serialize;

use crate::backend::{Backend, identity_provider};
use crate::{AuthArgs, StoreArgs};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).map_err(|e| miette::miette!("{}", e))?;
    println!("{}", out);
    Ok(())
}

fn print_report(report: &MigrationReport) {
    println!("Recovered {} -> {}", report.from, report.to);
    for count in &report.counts {
        println!(
            "  {}.{}: {} found, {} repointed",
            count.collection, count.field, count.found, count.queued
        );
    }
    println!(
        "Records repointed: {} ({} write(s))",
        report.records_remapped, report.operations
    );
    if report.left_unmigrated > 0 {
        println!(
            "  Warning: {} record(s) over the batch cap; run `raithamitra remap --from {} --to {}`",
            report.left_unmigrated, report.from, report.to
        );
    }
    if let Some(failure) = &report.failure {
        println!("  Warning: records not repointed: {}", failure);
    }
}

fn print_outcome(outcome: &ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::AlreadyMigrated { from } => match from {
            Some(from) => println!("Already recovered from {}; nothing to do.", from),
            None => println!("Already recovered; nothing to do."),
        },
        ReconcileOutcome::Provisioned => println!("Provisioned a new profile."),
        ReconcileOutcome::ExistingProfile => println!("Profile exists; nothing to do."),
        ReconcileOutcome::Recovered(report) => print_report(report),
    }
    if outcome.terminal_state() == TerminalState::DoneWithWarning {
        println!("Finished with warnings.");
    }
    println!("\n{}", outcome.user_message());
}

pub async fn request_otp(
    store: &StoreArgs,
    auth: &AuthArgs,
    config: RecoveryConfig,
    phone: &str,
    role: Role,
) -> Result<()> {
    let backend = Backend::open(store).await?;
    let reconciler = Reconciler::new(backend.store(), config).map_err(|e| miette::miette!("{}", e))?;
    let login = PasscodeLogin::new(Arc::new(identity_provider(auth)?), reconciler);

    let (session, phone) = login
        .request_passcode(phone, role)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Passcode sent to {}", phone);
    println!("Session: {}", session.0);
    Ok(())
}

pub async fn verify_otp(
    store: &StoreArgs,
    auth: &AuthArgs,
    config: RecoveryConfig,
    session: &str,
    code: &str,
    role: Role,
    json: bool,
) -> Result<()> {
    let backend = Backend::open(store).await?;
    let reconciler = Reconciler::new(backend.store(), config).map_err(|e| miette::miette!("{}", e))?;
    let login = PasscodeLogin::new(Arc::new(identity_provider(auth)?), reconciler);

    let signed_in = login
        .verify_and_reconcile(&VerificationSession(session.to_string()), code, role)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    backend.persist().await?;

    if json {
        return print_json(&signed_in.outcome);
    }
    println!(
        "Signed in as {} ({})",
        signed_in.verified.identity, signed_in.verified.phone_number
    );
    print_outcome(&signed_in.outcome);
    Ok(())
}

pub async fn reconcile(
    store: &StoreArgs,
    config: RecoveryConfig,
    identity: &str,
    phone: &str,
    role: Role,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let phone = PhoneNumber::parse(phone, &config).map_err(|e| miette::miette!("{}", e))?;
    let identity = Identity::from(identity);

    let backend = Backend::open(store).await?;
    let reconciler = Reconciler::new(backend.store(), config).map_err(|e| miette::miette!("{}", e))?;

    if dry_run {
        let preview = reconciler
            .preview(&identity, &phone, role)
            .await
            .map_err(|e| miette::miette!("{}", e))?;
        if json {
            return print_json(&preview);
        }

        let changes = preview.changes();
        println!(
            "Dry-run: {} record update(s) in {} write(s)",
            preview.counts.iter().map(|c| c.queued).sum::<usize>(),
            preview.operations
        );
        if changes.is_empty() {
            println!("No changes.");
        } else {
            println!("\nChanges:");
            for change in &changes {
                println!("  - {}", change);
            }
        }
        return Ok(());
    }

    let outcome = reconciler
        .reconcile_identity(&identity, &phone, role)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    backend.persist().await?;

    if json {
        return print_json(&outcome);
    }
    print_outcome(&outcome);
    Ok(())
}

pub async fn remap(
    store: &StoreArgs,
    config: RecoveryConfig,
    from: &str,
    to: &str,
    role: Role,
    json: bool,
) -> Result<()> {
    let backend = Backend::open(store).await?;
    let reconciler = Reconciler::new(backend.store(), config).map_err(|e| miette::miette!("{}", e))?;

    let report = reconciler
        .resume_remap(&Identity::from(from), &Identity::from(to), role)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    backend.persist().await?;

    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}
