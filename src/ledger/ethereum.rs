use anyhow::Context;
use async_trait::async_trait;
use ethers::{
    abi::{Abi, Token},
    contract::{Contract, ContractError},
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, BlockNumber, H256, U256, U64},
};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info, instrument};

use super::gateway::*;
use crate::error::{AppError, AppResult, LedgerError};

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Contract methods the service relies on; startup fails if the ABI lacks any of them
const REQUIRED_METHODS: [&str; 6] = [
    "assignRole",
    "getRole",
    "recordCredit",
    "approveCredit",
    "getStudentCredits",
    "nextCreditId",
];

#[derive(Debug, Clone)]
pub struct EthereumConfig {
    pub rpc_url: String,
    pub contract_address: String,
    pub private_key: String,
    pub abi_path: PathBuf,
    pub gas_limit: u64,
    pub gas_price_wei: u64,
}

/// Ledger gateway over Ethereum JSON-RPC
pub struct EthereumGateway {
    config: EthereumConfig,
    client: Arc<SignerClient>,
    contract: Contract<SignerClient>,
}

impl EthereumGateway {
    /// Build a gateway for a known chain id. Performs no network I/O.
    pub fn new(config: EthereumConfig, chain_id: u64) -> AppResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str()).map_err(|e| {
            AppError::Config(format!("invalid ledger rpc url {}: {}", config.rpc_url, e))
        })?;

        let wallet: LocalWallet = config
            .private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| AppError::Config(format!("invalid ETH_PRIVATE_KEY: {}", e)))?;
        let wallet = wallet.with_chain_id(chain_id);

        let contract_address: Address = normalize_address(&config.contract_address).parse().map_err(|e| {
            AppError::Config(format!(
                "invalid CREDIT_CONTRACT_ADDRESS {}: {}",
                config.contract_address, e
            ))
        })?;
        if contract_address == Address::zero() {
            return Err(AppError::Config(
                "CREDIT_CONTRACT_ADDRESS is zero; deploy the contract and update config".to_string(),
            ));
        }

        let abi = load_abi(&config.abi_path)?;
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = Contract::new(contract_address, abi, client.clone());

        Ok(Self {
            config,
            client,
            contract,
        })
    }

    /// Resolve the chain id from the node, then build the gateway
    pub async fn connect(config: EthereumConfig) -> AppResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str()).map_err(|e| {
            AppError::Config(format!("invalid ledger rpc url {}: {}", config.rpc_url, e))
        })?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("eth_chainId failed: {}", e)))?;

        info!("Connected to ledger {} (chain id {})", config.rpc_url, chain_id);
        Self::new(config, chain_id.as_u64())
    }

    /// Signing account used for every submission
    pub fn sender(&self) -> Address {
        self.client.address()
    }

    /// Nonce and chain id, fetched fresh for every submission
    async fn transaction_params(&self, operation: &str) -> AppResult<(U256, U256)> {
        let from = self.client.address();

        let nonce = self
            .client
            .get_transaction_count(from, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| submission_failed(operation, format!("fetching nonce: {}", e)))?;

        let chain_id = self
            .client
            .get_chainid()
            .await
            .map_err(|e| submission_failed(operation, format!("fetching chain id: {}", e)))?;

        Ok((nonce, chain_id))
    }
}

#[async_trait]
impl LedgerGateway for EthereumGateway {
    #[instrument(skip(self), fields(method = operation.method()))]
    async fn submit(&self, operation: &LedgerOperation) -> AppResult<TxHandle> {
        operation.validate()?;
        let method = operation.method();

        let call = match operation {
            LedgerOperation::AssignRole { address, role } => {
                let address = parse_address(address)?;
                self.contract
                    .method::<_, H256>(method, (address, role.as_str().to_string()))
            }
            LedgerOperation::RecordCredit {
                student_id,
                course_name,
                score,
            } => self
                .contract
                .method::<_, H256>(method, (student_id.clone(), course_name.clone(), *score)),
            LedgerOperation::ApproveCredit { credit_id } => self
                .contract
                .method::<_, H256>(method, U256::from(*credit_id)),
        }
        .map_err(|e| submission_failed(method, format!("encoding arguments: {}", e)))?;

        let (nonce, chain_id) = self.transaction_params(method).await?;

        let mut call = call
            .legacy()
            .nonce(nonce)
            .gas(self.config.gas_limit)
            .gas_price(self.config.gas_price_wei);
        call.tx.set_chain_id(chain_id.as_u64());

        let pending = call
            .send()
            .await
            .map_err(|e| submission_failed(method, e.to_string()))?;
        let tx_hash = format!("{:#x}", pending.tx_hash());

        info!(%tx_hash, %nonce, "Submitted {}", method);
        Ok(TxHandle::new(tx_hash))
    }

    async fn get_role(&self, address: &str) -> AppResult<Option<String>> {
        let address = parse_address(address)?;

        let role: String = self
            .contract
            .method::<_, String>("getRole", address)
            .map_err(|e| decode_failure("getRole", e))?
            .call()
            .await
            .map_err(|e| read_error("getRole", e))?;

        let role = role.trim().to_string();
        Ok((!role.is_empty()).then_some(role))
    }

    async fn student_credits(&self, student_id: &str) -> AppResult<Vec<LedgerCredit>> {
        let token: Token = self
            .contract
            .method::<_, Token>("getStudentCredits", student_id.to_string())
            .map_err(|e| decode_failure("getStudentCredits", e))?
            .call()
            .await
            .map_err(|e| read_error("getStudentCredits", e))?;

        let credits = decode_credit_list(token)?;
        debug!(student_id, count = credits.len(), "Read student credits");
        Ok(credits)
    }

    async fn next_credit_id(&self) -> AppResult<u64> {
        let next: U256 = self
            .contract
            .method::<_, U256>("nextCreditId", ())
            .map_err(|e| decode_failure("nextCreditId", e))?
            .call()
            .await
            .map_err(|e| read_error("nextCreditId", e))?;

        Ok(u256_to_u64(next, "nextCreditId")?)
    }

    async fn inclusion_status(&self, tx: &TxHandle) -> AppResult<InclusionStatus> {
        let hash: H256 = tx
            .hash
            .trim_start_matches("0x")
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("malformed transaction hash {}", tx.hash)))?;

        let receipt = self
            .client
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| LedgerError::ReadFailed {
                query: "eth_getTransactionReceipt".to_string(),
                message: e.to_string(),
            })?;

        let Some(receipt) = receipt else {
            return Ok(InclusionStatus::Pending);
        };
        let Some(block_number) = receipt.block_number else {
            return Ok(InclusionStatus::Pending);
        };

        if receipt.status == Some(U64::zero()) {
            return Ok(InclusionStatus::Reverted {
                block_number: block_number.as_u64(),
            });
        }
        Ok(InclusionStatus::Included {
            block_number: block_number.as_u64(),
        })
    }
}

fn submission_failed(operation: &str, message: impl Into<String>) -> AppError {
    LedgerError::SubmissionFailed {
        operation: operation.to_string(),
        message: message.into(),
    }
    .into()
}

fn decode_failure(query: &str, err: impl std::fmt::Display) -> AppError {
    LedgerError::DecodeFailure {
        query: query.to_string(),
        message: err.to_string(),
    }
    .into()
}

fn read_error<M: Middleware>(query: &str, err: ContractError<M>) -> AppError {
    match err {
        ContractError::DecodingError(_)
        | ContractError::AbiError(_)
        | ContractError::DetokenizationError(_) => decode_failure(query, err),
        other => LedgerError::ReadFailed {
            query: query.to_string(),
            message: other.to_string(),
        }
        .into(),
    }
}

/// Parses a validated address in either `0x`/`0X` case; ethers only accepts lowercase `0x`
fn parse_address(address: &str) -> AppResult<Address> {
    validate_address(address)?;
    normalize_address(address)
        .parse()
        .map_err(|_| AppError::InvalidAddress(address.to_string()))
}

/// Accepts either a bare ABI array or a build artifact with an `abi` field
pub fn load_abi(path: &std::path::Path) -> AppResult<Abi> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading contract ABI {}", path.display()))?;
    let abi = parse_abi(&raw).with_context(|| format!("parsing contract ABI {}", path.display()))?;
    Ok(abi)
}

fn parse_abi(raw: &str) -> anyhow::Result<Abi> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let abi_value = value.get("abi").cloned().unwrap_or(value);
    let abi: Abi = serde_json::from_value(abi_value)?;

    for method in REQUIRED_METHODS {
        abi.function(method)
            .with_context(|| format!("ABI has no {} function", method))?;
    }
    Ok(abi)
}

fn u256_to_u64(value: U256, query: &str) -> Result<u64, LedgerError> {
    if value > U256::from(u64::MAX) {
        return Err(LedgerError::DecodeFailure {
            query: query.to_string(),
            message: format!("{} does not fit in u64", value),
        });
    }
    Ok(value.as_u64())
}

/// Decode `getStudentCredits` output: an array of
/// `(uint256 id, string studentId, string courseName, uint8 score, address teacher, bool isApproved, ...)`
pub fn decode_credit_list(token: Token) -> Result<Vec<LedgerCredit>, LedgerError> {
    let items = match token {
        Token::Array(items) | Token::FixedArray(items) => items,
        other => {
            return Err(credit_decode_error(format!("expected array, got {:?}", other)));
        }
    };
    items.into_iter().map(decode_credit).collect()
}

fn decode_credit(token: Token) -> Result<LedgerCredit, LedgerError> {
    let fields = match token {
        Token::Tuple(fields) => fields,
        other => return Err(credit_decode_error(format!("expected tuple, got {:?}", other))),
    };
    if fields.len() < 6 {
        return Err(credit_decode_error(format!(
            "credit tuple has {} fields, expected at least 6",
            fields.len()
        )));
    }

    let id = match &fields[0] {
        Token::Uint(v) => u256_to_u64(*v, "getStudentCredits")?,
        other => return Err(credit_decode_error(format!("id: unexpected {:?}", other))),
    };
    let score = match &fields[3] {
        Token::Uint(v) if *v <= U256::from(u8::MAX) => v.as_u32() as u8,
        other => return Err(credit_decode_error(format!("score: unexpected {:?}", other))),
    };
    let is_approved = match &fields[5] {
        Token::Bool(b) => *b,
        other => return Err(credit_decode_error(format!("isApproved: unexpected {:?}", other))),
    };
    let teacher = match &fields[4] {
        Token::Address(a) => Some(format!("{:#x}", a)),
        _ => None,
    };

    Ok(LedgerCredit {
        id,
        student_id: string_field(&fields[1], "studentId")?,
        course_name: string_field(&fields[2], "courseName")?,
        score,
        teacher,
        is_approved,
    })
}

fn string_field(token: &Token, name: &str) -> Result<String, LedgerError> {
    match token {
        Token::String(s) => Ok(s.clone()),
        other => Err(credit_decode_error(format!("{}: unexpected {:?}", name, other))),
    }
}

fn credit_decode_error(message: String) -> LedgerError {
    LedgerError::DecodeFailure {
        query: "getStudentCredits".to_string(),
        message,
    }
}
