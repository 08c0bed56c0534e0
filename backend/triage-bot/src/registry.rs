//! Read-only client for the on-chain project registry.
//!
//! Only two view functions are used: `totalProjects()` and
//! `getProjectList(uint256 limit, uint256 offset)`. Both are issued as
//! `eth_call` through an ethers [`Provider`] and ABI-decoded with
//! `ethers_core::abi`.

use async_trait::async_trait;
use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::{Bytes, TransactionRequest, H160, U256};
use ethers_core::utils::id;
use ethers_providers::{Http, JsonRpcClient, Middleware, Provider};
use tracing::debug;

use crate::errors::{Result, TriageError};
use crate::project::{Address, Project};

const TOTAL_PROJECTS_SIG: &str = "totalProjects()";
const GET_PROJECT_LIST_SIG: &str = "getProjectList(uint256,uint256)";

/// One entry of `getProjectList`, in registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub owner: String,
    pub contracts: Vec<String>,
    pub domain: String,
    pub contact: String,
}

impl From<ProjectRecord> for Project {
    fn from(record: ProjectRecord) -> Self {
        Project {
            owner: Address::new(&record.owner),
            contracts: record.contracts.iter().map(|c| Address::new(c)).collect(),
            domain: record.domain,
            contact: record.contact,
        }
    }
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn total_projects(&self) -> Result<u64>;
    async fn get_project_list(&self, limit: u64, offset: u64) -> Result<Vec<ProjectRecord>>;
}

// ─────────────────────────────────────────────────────────
// eth_call client
// ─────────────────────────────────────────────────────────

pub struct EthRegistry<P = Http> {
    provider: Provider<P>,
    contract: H160,
}

impl EthRegistry<Http> {
    pub fn connect(rpc_url: &str, contract: &Address) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| TriageError::Config(format!("invalid RPC_URL {rpc_url}: {e}")))?;
        Self::new(provider, contract)
    }
}

impl<P: JsonRpcClient> EthRegistry<P> {
    pub fn new(provider: Provider<P>, contract: &Address) -> Result<Self> {
        let contract = contract.as_str().parse::<H160>().map_err(|e| {
            TriageError::Config(format!("invalid registry address {contract}: {e}"))
        })?;
        Ok(Self { provider, contract })
    }

    async fn eth_call(&self, calldata: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::new().to(self.contract).data(calldata);
        self.provider
            .call(&tx.into(), None)
            .await
            .map_err(|e| TriageError::RegistryUnavailable(e.to_string()))
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> Registry for EthRegistry<P> {
    async fn total_projects(&self) -> Result<u64> {
        let data = self.eth_call(id(TOTAL_PROJECTS_SIG).to_vec().into()).await?;
        let total = decode_total_projects(&data)?;
        debug!("Registry reports {total} projects");
        Ok(total)
    }

    async fn get_project_list(&self, limit: u64, offset: u64) -> Result<Vec<ProjectRecord>> {
        let data = self
            .eth_call(encode_project_list_call(limit, offset))
            .await?;
        decode_project_list(&data)
    }
}

// ─────────────────────────────────────────────────────────
// ABI helpers
// ─────────────────────────────────────────────────────────

/// `(address,address[],string,string)[]`
fn project_list_type() -> ParamType {
    ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Array(Box::new(ParamType::Address)),
        ParamType::String,
        ParamType::String,
    ])))
}

pub fn encode_project_list_call(limit: u64, offset: u64) -> Bytes {
    let mut data = id(GET_PROJECT_LIST_SIG).to_vec();
    data.extend(abi::encode(&[
        Token::Uint(U256::from(limit)),
        Token::Uint(U256::from(offset)),
    ]));
    data.into()
}

fn decode_total_projects(data: &[u8]) -> Result<u64> {
    let total = abi::decode(&[ParamType::Uint(256)], data)
        .map_err(|e| TriageError::AbiDecode(e.to_string()))?
        .pop()
        .and_then(Token::into_uint)
        .ok_or_else(|| TriageError::AbiDecode("totalProjects returned no uint".to_string()))?;
    if total > U256::from(u64::MAX) {
        return Err(TriageError::AbiDecode(format!(
            "project count {total} does not fit in 64 bits"
        )));
    }
    Ok(total.as_u64())
}

pub fn decode_project_list(data: &[u8]) -> Result<Vec<ProjectRecord>> {
    abi::decode(&[project_list_type()], data)
        .map_err(|e| TriageError::AbiDecode(e.to_string()))?
        .pop()
        .and_then(Token::into_array)
        .ok_or_else(|| TriageError::AbiDecode("getProjectList returned no array".to_string()))?
        .into_iter()
        .map(record_from_token)
        .collect()
}

fn record_from_token(token: Token) -> Result<ProjectRecord> {
    let malformed = || TriageError::AbiDecode("malformed project tuple".to_string());
    let mut fields = token.into_tuple().ok_or_else(malformed)?.into_iter();
    let mut next = || fields.next().ok_or_else(malformed);

    let owner = next()?.into_address().ok_or_else(malformed)?;
    let contracts = next()?
        .into_array()
        .ok_or_else(malformed)?
        .into_iter()
        .map(|t| t.into_address().map(|a| format!("{a:#x}")).ok_or_else(malformed))
        .collect::<Result<Vec<_>>>()?;
    let domain = next()?.into_string().ok_or_else(malformed)?;
    let contact = next()?.into_string().ok_or_else(malformed)?;

    Ok(ProjectRecord {
        owner: format!("{owner:#x}"),
        contracts,
        domain,
        contact,
    })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
