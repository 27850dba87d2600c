/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::{sync::Semaphore, task::JoinSet, time::Instant};

use crate::{
    common::cache::KeyCache,
    dkim::{Algorithm, DomainKey, Signature},
    Annotation, Error, MessageVerdict, ParsedMessage, Resolver, Result, Verdict,
    VerificationResult,
};

use super::{Config, PassPolicy, Stage, Verifier};

// Upper bound for deadlines that do not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// State shared by the signature tasks of one `verify` call. Dropped when the call
/// returns, taking the key cache with it.
struct Run {
    resolver: Resolver,
    config: Arc<Config>,
    cache: KeyCache,
    message: ParsedMessage,
    now: u64,
}

struct SignatureCheck {
    index: usize,
    signature: Signature,
    annotations: Vec<Annotation>,
}

impl Verifier {
    pub fn new(resolver: Resolver, config: Config) -> Self {
        Verifier {
            resolver,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Verifies all DKIM signatures of an RFC 5322 message within the configured
    /// deadline. Only a message without a header/body separator is an error; every
    /// other failure is reported per signature in the returned verdict.
    pub async fn verify(&self, raw_message: &[u8]) -> Result<MessageVerdict> {
        self.verify_until(raw_message, self.deadline()).await
    }

    /// Same as [`Verifier::verify`] with an explicit deadline. Signatures that have not
    /// finished by then are reported as `key-not-found`.
    pub async fn verify_until(
        &self,
        raw_message: &[u8],
        deadline: Instant,
    ) -> Result<MessageVerdict> {
        self.verify_(
            raw_message,
            deadline,
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        )
        .await
    }

    #[cfg(test)]
    pub(crate) async fn verify_at(&self, raw_message: &[u8], now: u64) -> Result<MessageVerdict> {
        self.verify_(raw_message, self.deadline(), now).await
    }

    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.deadline)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }

    async fn verify_(
        &self,
        raw_message: &[u8],
        deadline: Instant,
        now: u64,
    ) -> Result<MessageVerdict> {
        let message = ParsedMessage::parse(raw_message)?;
        let indexes = message.signature_indexes().collect::<Vec<_>>();

        if indexes.is_empty() {
            tracing::debug!(context = "dkim", "No DKIM-Signature headers found");
            return Ok(MessageVerdict::new(Vec::new(), Verdict::NoSignature));
        }

        let run = Arc::new(Run {
            resolver: self.resolver.clone(),
            config: self.config.clone(),
            cache: KeyCache::new(),
            message,
            now,
        });
        let semaphore = Arc::new(Semaphore::new(
            self.config
                .max_concurrency
                .clamp(1, Semaphore::MAX_PERMITS),
        ));
        let mut tasks = JoinSet::new();
        let mut slots = Vec::with_capacity(indexes.len());

        for (slot, index) in indexes.into_iter().enumerate() {
            let value = &run.message.headers[index].value;
            match Signature::parse(value) {
                Ok(signature) => {
                    tracing::debug!(
                        context = "dkim",
                        index,
                        domain = signature.domain(),
                        selector = signature.selector(),
                        algorithm = signature.algorithm().as_str(),
                        "Found DKIM signature"
                    );
                    slots.push((
                        VerificationResult::new(index, signature.domain(), signature.selector())
                            .with_signature_prefix(&signature.b),
                        false,
                    ));

                    let run = run.clone();
                    let semaphore = semaphore.clone();
                    tasks.spawn(async move {
                        let _permit = semaphore.acquire_owned().await.ok();
                        (slot, run.check(index, signature).await)
                    });
                }
                Err(err) => {
                    let (domain, selector) = Signature::parse_identity(value);
                    tracing::debug!(
                        context = "dkim",
                        index,
                        domain = domain.as_str(),
                        selector = selector.as_str(),
                        reason = %err,
                        "Failed to parse DKIM signature"
                    );
                    slots.push((
                        VerificationResult::new(index, domain, selector).with_outcome(Err(err)),
                        true,
                    ));
                }
            }
        }

        let collected = tokio::time::timeout_at(deadline, async {
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok((slot, result)) => slots[slot] = (result, true),
                    Err(err) => {
                        tracing::warn!(context = "dkim", reason = %err, "Signature task failed");
                    }
                }
            }
        })
        .await;

        let pending_error = if collected.is_err() {
            tracing::debug!(
                context = "dkim",
                pending = tasks.len(),
                "Verification deadline exceeded"
            );
            tasks.abort_all();
            Error::DeadlineExceeded
        } else {
            Error::FailedVerification
        };

        let results = slots
            .into_iter()
            .map(|(result, is_done)| {
                if is_done {
                    result
                } else {
                    result.with_outcome(Err(pending_error.clone()))
                }
            })
            .collect::<Vec<_>>();
        let verdict = self.config.pass_policy.apply(&results);

        tracing::debug!(
            context = "dkim",
            signatures = results.len(),
            verified = results.iter().filter(|r| r.outcome().is_verified()).count(),
            verdict = %verdict,
            "DKIM verification completed"
        );

        Ok(MessageVerdict::new(results, verdict))
    }
}

impl Run {
    async fn check(&self, index: usize, signature: Signature) -> VerificationResult {
        let mut check = SignatureCheck::new(index, signature);
        let mut stage = Stage::Parsed;

        while !stage.is_terminal() {
            stage = check.advance(self, stage).await;
            tracing::trace!(
                context = "dkim",
                index,
                domain = check.signature.domain(),
                selector = check.signature.selector(),
                stage = stage.name(),
                "Stage transition"
            );
        }

        match stage {
            Stage::Rejected(err) => {
                tracing::debug!(
                    context = "dkim",
                    index,
                    domain = check.signature.domain(),
                    selector = check.signature.selector(),
                    reason = %err,
                    "Signature rejected"
                );
                check.finish(Err(err))
            }
            _ => check.finish(Ok(())),
        }
    }
}

impl SignatureCheck {
    fn new(index: usize, signature: Signature) -> Self {
        let mut annotations = Vec::new();
        if !signature.signs_header("From") {
            annotations.push(Annotation::FromNotSigned);
        }

        SignatureCheck {
            index,
            signature,
            annotations,
        }
    }

    async fn advance(&mut self, run: &Run, stage: Stage) -> Stage {
        let next = match stage {
            Stage::Parsed => self.check_body(run).map(|_| Stage::BodyChecked),
            Stage::BodyChecked => self.resolve_key(run).await.map(Stage::KeyResolved),
            Stage::KeyResolved(record) => self
                .signature
                .verify_headers(&record, &run.message, &run.message.headers[self.index])
                .map(|_| Stage::Verified),
            terminal => Ok(terminal),
        };

        next.unwrap_or_else(Stage::Rejected)
    }

    fn check_body(&mut self, run: &Run) -> Result<()> {
        let signature = &self.signature;
        let skew = run.config.clock_skew.as_secs();

        if signature.algorithm() == Algorithm::RsaSha1 && !run.config.allow_sha1 {
            return Err(Error::DisabledAlgorithm(Algorithm::RsaSha1.as_str()));
        }
        if signature
            .expiration()
            .is_some_and(|x| x.saturating_add(skew) < run.now)
        {
            return Err(Error::SignatureExpired);
        }
        if signature
            .timestamp()
            .is_some_and(|t| t > run.now.saturating_add(skew))
        {
            return Err(Error::FutureTimestamp);
        }

        let hash = signature.verify_body(&run.message.body)?;
        if hash.is_partial() {
            self.annotations.push(Annotation::PartialBody {
                signed: hash.signed_len(),
                total: hash.total_len(),
            });
            if run.config.reject_partial_body {
                return Err(Error::PartialBodyRejected);
            }
        }

        Ok(())
    }

    async fn resolve_key(&mut self, run: &Run) -> Result<Arc<DomainKey>> {
        let name = self.signature.domain_key();
        let record = run
            .cache
            .get_or_lookup(&name, || {
                run.resolver.txt_lookup::<DomainKey>(
                    name.as_str(),
                    run.config.lookup_timeout,
                    run.config.lookup_retries,
                )
            })
            .await?;

        if record.is_testing() {
            self.annotations.push(Annotation::Testing);
        }
        self.signature.validate_key(&record, run.config.min_rsa_bits)?;

        Ok(record)
    }

    fn finish(self, result: Result<()>) -> VerificationResult {
        VerificationResult::new(
            self.index,
            self.signature.domain(),
            self.signature.selector(),
        )
        .with_signature_prefix(&self.signature.b)
        .with_annotations(self.annotations)
        .with_outcome(result)
    }
}

impl PassPolicy {
    pub fn apply(&self, results: &[VerificationResult]) -> Verdict {
        if results.is_empty() {
            return Verdict::NoSignature;
        }

        let passed = match self {
            PassPolicy::Any => results.iter().any(|r| r.outcome().is_verified()),
            PassPolicy::All => results.iter().all(|r| r.outcome().is_verified()),
        };

        if passed {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}
