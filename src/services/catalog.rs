/// 本进程对外提供的 gRPC 能力，名称在编译期固定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    User,
    Order,
    Product,
    Health,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::User,
        ServiceKind::Order,
        ServiceKind::Product,
        ServiceKind::Health,
    ];

    /// 完整的 gRPC 服务名（`package.Service`）
    pub const fn full_name(self) -> &'static str {
        match self {
            ServiceKind::User => "user.UserService",
            ServiceKind::Order => "order.OrderService",
            ServiceKind::Product => "product.ProductService",
            ServiceKind::Health => "grpc.health.v1.Health",
        }
    }

    pub fn from_full_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.full_name() == name)
    }

    /// 作为注册标签上报的全部服务名
    pub fn registration_tags() -> Vec<String> {
        Self::ALL
            .iter()
            .map(|kind| kind.full_name().to_string())
            .collect()
    }
}
