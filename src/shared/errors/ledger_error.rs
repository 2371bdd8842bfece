use thiserror::Error;

/// 원장(주문/예약/체결) 관련 에러
/// Ledger-related errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// 낙관적 잠금 충돌 (버전 불일치, 다른 트랜잭션이 행을 보유, 중복 체결)
    /// Optimistic write conflict
    #[error("Write conflict on {entity} id={id}")]
    WriteConflict { entity: &'static str, id: i64 },

    /// 알 수 없는 주문 방향 (설정 오류, 발생하면 안 됨)
    /// Unknown order side
    #[error("Unknown order side: {0}")]
    UnknownSide(String),

    /// 주문을 찾을 수 없음
    /// Order not found
    #[error("Order not found: id={id}")]
    OrderNotFound { id: i64 },

    /// 잘못된 주문 입력
    /// Invalid order input
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// 이미 커밋/롤백된 트랜잭션 사용
    /// Transaction already finished
    #[error("Transaction already committed or rolled back")]
    TransactionClosed,

    /// 데이터베이스 에러
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// 재시도로 해결될 수 있는 충돌인지 여부
    /// Whether a retry of the whole unit can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::WriteConflict { .. })
    }

    /// 워커를 멈춰야 하는 치명적 에러인지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::UnknownSide(_))
    }

    /// sqlx 에러를 원장 에러로 변환
    ///
    /// 유니크 위반(23505), 직렬화 실패(40001), 교착 상태(40P01)는
    /// 쓰기 충돌로 취급합니다.
    pub fn from_sqlx(err: sqlx::Error, entity: &'static str, id: i64) -> Self {
        let conflict = match &err {
            sqlx::Error::Database(db_err) => matches!(
                db_err.code().as_deref(),
                Some("23505") | Some("40001") | Some("40P01")
            ),
            _ => false,
        };

        if conflict {
            LedgerError::WriteConflict { entity, id }
        } else {
            LedgerError::Database(err)
        }
    }
}

/// 원장 연산 결과 타입
pub type LedgerResult<T> = Result<T, LedgerError>;
